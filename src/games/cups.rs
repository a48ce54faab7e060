//! Cup-guessing game engine.
//!
//! Queue-routed. Each round hides a coin under one of six cups; a correct
//! guess multiplies the pot (x5 on the first round, x2 afterwards) and
//! offers continue-or-cash-out. The two timeout policies are asymmetric
//! on purpose: silence while guessing forfeits the wager, silence after a
//! win cashes the pot out.

use crate::config::ArenaConfig;
use crate::gateway::{Action, Control, CupsAction, GameView, Gateway, Tone};
use crate::games::types::GameType;
use crate::games::wait_for;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::queue::{GameJob, TurnQueue};
use crate::session::SessionStore;
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

pub const CUP_COUNT: u8 = 6;

/// Pot multiplier for a correct guess in the given round (1-based).
pub fn win_multiplier(round: u32) -> Coins {
    if round == 1 {
        5
    } else {
        2
    }
}

pub struct CupsEngine {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    sessions: SessionStore,
    min_bet: Coins,
    guess_window: Duration,
    decision_window: Duration,
}

impl CupsEngine {
    pub fn new(
        config: &ArenaConfig,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn Gateway>,
        metrics: Arc<MetricsRecorder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            gateway,
            metrics,
            sessions: SessionStore::new("cups"),
            min_bet: config.bets.cups_min,
            guess_window: config.timing.guess_window(),
            decision_window: config.timing.decision_window(),
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn start(
        self: Arc<Self>,
        queue: &TurnQueue,
        player: PlayerId,
        wager: Coins,
        channel: ChannelId,
    ) -> GameResult<()> {
        if wager < self.min_bet {
            return Err(GameError::BetBelowMinimum { min: self.min_bet });
        }
        if self.sessions.contains(&player) {
            return Err(GameError::AlreadyActive);
        }
        if self.ledger.balance(&player).await? < wager {
            return Err(GameError::InsufficientFunds);
        }

        let engine = Arc::clone(&self);
        let gateway = Arc::clone(&self.gateway);
        let queued_channel = channel.clone();
        let queued_player = player.clone();

        let job = GameJob::new(player.clone(), move |guard| async move {
            engine.run_game(player, wager, channel).await;
            drop(guard);
        })
        .notify_queued(move |position| {
            tokio::spawn(async move {
                let view = GameView::new(
                    "Queued",
                    format!("{queued_player} queued for the cup game (position #{position})."),
                    Tone::Info,
                );
                let _ = gateway.announce(&queued_channel, &view).await;
            });
        });

        queue.enqueue(job)
    }

    async fn run_game(&self, player: PlayerId, wager: Coins, channel: ChannelId) {
        if let Err(e) = self.ledger.withdraw(&player, wager).await {
            tracing::info!(%player, error = %e, "cups wager refused after queue wait");
            let view = GameView::new(
                "Cup Game",
                format!("{player} ran out of funds while waiting in the queue."),
                Tone::Danger,
            );
            let _ = self.gateway.announce(&channel, &view).await;
            return;
        }

        let mut rx = match self.sessions.open(&player, wager, &channel) {
            Ok(rx) => rx,
            Err(_) => {
                let _ = self.ledger.deposit(&player, wager).await;
                return;
            }
        };
        self.metrics.record_wager(GameType::Cups, wager);

        let mut pot = wager;
        let mut round: u32 = 1;
        let mut message = None;

        loop {
            let winning_cup = rand::thread_rng().gen_range(1..=CUP_COUNT);

            let view = Self::guess_view(round, pot);
            let handle = match &message {
                None => match self.gateway.render_initial(&channel, &player, &view).await {
                    Ok(handle) => {
                        message = Some(handle.clone());
                        handle
                    }
                    Err(e) => {
                        tracing::warn!(%player, error = %e, "cups initial render failed, refunding");
                        let _ = self.ledger.deposit(&player, wager).await;
                        self.sessions.close(&player);
                        return;
                    }
                },
                Some(handle) => {
                    let _ = self.gateway.render_update(handle, &view).await;
                    handle.clone()
                }
            };

            // Guess phase: only a pick counts; anything else keeps waiting.
            let choice = match wait_for(&mut rx, self.guess_window, |action| match action {
                Action::Cups(CupsAction::Pick(cup)) if (1..=CUP_COUNT).contains(&cup) => Some(cup),
                _ => None,
            })
            .await
            {
                Some(cup) => cup,
                None => {
                    tracing::info!(%player, wager, "cups guess timed out, wager forfeited");
                    let view = GameView::new(
                        "Cup Game - timed out",
                        format!("No guess in time. {player} lost the bet of {wager}."),
                        Tone::Danger,
                    );
                    let _ = self.gateway.render_terminal(&handle, &view).await;
                    break;
                }
            };

            if choice != winning_cup {
                let view = GameView::new(
                    "WRONG!",
                    format!(
                        "Picked cup {choice}, but the coin was under cup {winning_cup}.\nLost {wager}."
                    ),
                    Tone::Danger,
                );
                let _ = self.gateway.render_terminal(&handle, &view).await;
                break;
            }

            pot *= win_multiplier(round);

            let view = Self::decision_view(winning_cup, pot, round);
            let _ = self.gateway.render_update(&handle, &view).await;

            // Decision phase: cash out, continue, or auto-cash-out on
            // silence. A timeout after a win is a win, not a loss.
            let decision = wait_for(&mut rx, self.decision_window, |action| match action {
                Action::Cups(CupsAction::CashOut) => Some(CupsAction::CashOut),
                Action::Cups(CupsAction::Continue) => Some(CupsAction::Continue),
                _ => None,
            })
            .await;

            match decision {
                Some(CupsAction::Continue) => {
                    round += 1;
                }
                Some(_) => {
                    self.pay_out(&player, pot).await;
                    let view = GameView::new(
                        "Cashed out!",
                        format!("{player} walked away with {pot}."),
                        Tone::Success,
                    );
                    let _ = self.gateway.render_terminal(&handle, &view).await;
                    break;
                }
                None => {
                    self.pay_out(&player, pot).await;
                    tracing::info!(%player, pot, "cups decision timed out, auto cash-out");
                    let view = GameView::new(
                        "Auto cash-out",
                        format!("Timeout. Cashing out {pot} for {player}."),
                        Tone::Success,
                    );
                    let _ = self.gateway.render_terminal(&handle, &view).await;
                    break;
                }
            }
        }

        self.sessions.close(&player);
    }

    async fn pay_out(&self, player: &PlayerId, pot: Coins) {
        if let Err(e) = self.ledger.deposit(player, pot).await {
            tracing::error!(%player, pot, error = %e, "cups payout failed");
        }
        self.metrics.record_payout(pot);
    }

    fn guess_view(round: u32, pot: Coins) -> GameView {
        let controls = (1..=CUP_COUNT)
            .map(|cup| Control::new(format!("Cup {cup}"), Action::Cups(CupsAction::Pick(cup))))
            .collect();
        GameView::new(
            format!("Cup Game - Round {round}"),
            format!("Current pot: {pot}\nGuess where the coin is!"),
            Tone::Highlight,
        )
        .with_controls(controls)
    }

    fn decision_view(winning_cup: u8, pot: Coins, round: u32) -> GameView {
        let continue_label = if round == 1 {
            "Continue (10x or nothing)"
        } else {
            "Continue (double or nothing)"
        };
        GameView::new(
            "CORRECT!",
            format!(
                "The coin was under cup {winning_cup}.\nYou have {pot}.\nCash out or keep going?"
            ),
            Tone::Success,
        )
        .with_controls(vec![
            Control::new("Cash Out", Action::Cups(CupsAction::CashOut)),
            Control::new(continue_label, Action::Cups(CupsAction::Continue)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_round_pays_five_times_then_doubles() {
        assert_eq!(win_multiplier(1), 5);
        assert_eq!(win_multiplier(2), 2);
        assert_eq!(win_multiplier(9), 2);

        // Pot progression: 100 -> 500 -> 1000 -> 2000.
        let mut pot: Coins = 100;
        for round in 1..=3 {
            pot *= win_multiplier(round);
        }
        assert_eq!(pot, 2_000);
    }
}
