//! Scheduled roulette wheel.
//!
//! Unlike the per-player games this is one shared round with a fixed
//! betting window, cycling Open -> Spinning -> Open forever while
//! enabled. Stakes are debited at bet time; winners are paid stake plus
//! profit at the spin.

use crate::config::ArenaConfig;
use crate::gateway::{GameView, Gateway, Tone};
use crate::games::types::GameType;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouletteColor {
    Red,
    Black,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Half {
    /// 1-18
    Low,
    /// 19-36
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dozen {
    /// 1-12
    First,
    /// 13-24
    Second,
    /// 25-36
    Third,
}

/// A typed roulette bet. The command layer decodes user input into this
/// before it reaches the wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RouletteBet {
    Straight(u8),
    Color(RouletteColor),
    Parity(Parity),
    Half(Half),
    Dozen(Dozen),
}

/// Wheel layout: index is the pocket number.
const COLORS: [RouletteColor; 37] = {
    use RouletteColor::{Black as B, Green as G, Red as R};
    [
        G, // 0
        R, B, R, B, R, B, R, B, R, // 1-9
        B, B, R, B, R, B, R, B, R, // 10-18
        R, B, R, B, R, B, R, B, R, // 19-27
        B, B, R, B, R, B, R, B, R, // 28-36
    ]
};

pub fn color_of(number: u8) -> RouletteColor {
    COLORS[number as usize]
}

impl RouletteBet {
    pub fn validate(&self) -> GameResult<()> {
        match self {
            RouletteBet::Straight(n) if *n > 36 => Err(GameError::InvalidBet(format!(
                "number {n} is not on the wheel"
            ))),
            RouletteBet::Color(RouletteColor::Green) => Err(GameError::InvalidBet(
                "color bets are red or black".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Profit multiplier on a win (stake is returned on top).
    pub fn payout_multiplier(&self) -> Coins {
        match self {
            RouletteBet::Straight(_) => 35,
            RouletteBet::Color(_) | RouletteBet::Parity(_) | RouletteBet::Half(_) => 1,
            RouletteBet::Dozen(_) => 2,
        }
    }

    /// Does this bet win against the drawn number? Zero loses every
    /// outside bet.
    pub fn wins(&self, number: u8) -> bool {
        match self {
            RouletteBet::Straight(n) => *n == number,
            RouletteBet::Color(color) => number != 0 && color_of(number) == *color,
            RouletteBet::Parity(parity) => {
                number != 0
                    && match parity {
                        Parity::Even => number % 2 == 0,
                        Parity::Odd => number % 2 == 1,
                    }
            }
            RouletteBet::Half(half) => match half {
                Half::Low => (1..=18).contains(&number),
                Half::High => (19..=36).contains(&number),
            },
            RouletteBet::Dozen(dozen) => match dozen {
                Dozen::First => (1..=12).contains(&number),
                Dozen::Second => (13..=24).contains(&number),
                Dozen::Third => (25..=36).contains(&number),
            },
        }
    }

    fn label(&self) -> String {
        match self {
            RouletteBet::Straight(n) => format!("number {n}"),
            RouletteBet::Color(RouletteColor::Red) => "red".to_string(),
            RouletteBet::Color(RouletteColor::Black) => "black".to_string(),
            RouletteBet::Color(RouletteColor::Green) => "green".to_string(),
            RouletteBet::Parity(Parity::Even) => "even".to_string(),
            RouletteBet::Parity(Parity::Odd) => "odd".to_string(),
            RouletteBet::Half(Half::Low) => "low (1-18)".to_string(),
            RouletteBet::Half(Half::High) => "high (19-36)".to_string(),
            RouletteBet::Dozen(Dozen::First) => "1st dozen".to_string(),
            RouletteBet::Dozen(Dozen::Second) => "2nd dozen".to_string(),
            RouletteBet::Dozen(Dozen::Third) => "3rd dozen".to_string(),
        }
    }
}

/// Total credit for a winning bet: stake plus profit.
pub fn winnings(amount: Coins, bet: &RouletteBet) -> Coins {
    amount + amount * bet.payout_multiplier()
}

#[derive(Debug, Clone)]
struct PlacedBet {
    player: PlayerId,
    bet: RouletteBet,
    amount: Coins,
}

struct Round {
    bets: Vec<PlacedBet>,
    spinning: bool,
    window_end: DateTime<Utc>,
}

/// Snapshot of the current round for the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInfo {
    pub window_end: DateTime<Utc>,
    pub open: bool,
}

pub struct RouletteWheel {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    min_bet: Coins,
    interval: Duration,
    enabled: bool,
    round: Mutex<Option<Round>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl RouletteWheel {
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
            min_bet: config.bets.roulette_min,
            interval: config.roulette.interval(),
            enabled: config.roulette.enabled,
            round: Mutex::new(None),
            stop: Mutex::new(None),
        })
    }

    /// Open the first round and spawn the spin scheduler. Announcements
    /// go to `channel`. No-op when disabled or already running.
    pub fn start(self: Arc<Self>, channel: ChannelId) {
        if !self.enabled {
            tracing::info!("roulette disabled in configuration");
            return;
        }
        let mut stop_slot = self.stop.lock().expect("roulette stop lock");
        if stop_slot.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *stop_slot = Some(stop_tx);
        drop(stop_slot);

        tracing::info!(interval_secs = self.interval.as_secs(), "starting roulette scheduler");

        let wheel = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                wheel.open_round();
                wheel.announce_open(&channel).await;
                tokio::select! {
                    _ = tokio::time::sleep(wheel.interval) => {
                        wheel.spin(&channel).await;
                    }
                    _ = stop_rx.changed() => {
                        tracing::info!("roulette stopped");
                        *wheel.round.lock().expect("roulette round lock") = None;
                        return;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        if let Some(stop_tx) = self.stop.lock().expect("roulette stop lock").take() {
            let _ = stop_tx.send(true);
        }
    }

    pub fn round_info(&self) -> Option<RoundInfo> {
        self.round
            .lock()
            .expect("roulette round lock")
            .as_ref()
            .map(|round| RoundInfo {
                window_end: round.window_end,
                open: !round.spinning,
            })
    }

    /// Place a bet in the current round. Multiple bets per player per
    /// round are allowed.
    pub async fn place_bet(
        &self,
        player: PlayerId,
        bet: RouletteBet,
        amount: Coins,
    ) -> GameResult<()> {
        bet.validate()?;
        if amount < self.min_bet {
            return Err(GameError::BetBelowMinimum { min: self.min_bet });
        }

        // Fast gate before touching funds.
        self.check_open()?;

        self.ledger.withdraw(&player, amount).await?;

        // The wheel may have started spinning while the debit ran; a bet
        // cannot join a spun round, so roll the debit back.
        {
            let mut guard = self.round.lock().expect("roulette round lock");
            match guard.as_mut() {
                Some(round) if !round.spinning => {
                    round.bets.push(PlacedBet {
                        player: player.clone(),
                        bet,
                        amount,
                    });
                }
                _ => {
                    drop(guard);
                    let _ = self.ledger.deposit(&player, amount).await;
                    return Err(GameError::BettingClosed);
                }
            }
        }

        self.metrics.record_wager(GameType::Roulette, amount);
        tracing::info!(%player, amount, bet = %bet.label(), "roulette bet placed");
        Ok(())
    }

    fn check_open(&self) -> GameResult<()> {
        let guard = self.round.lock().expect("roulette round lock");
        match guard.as_ref() {
            None => Err(GameError::NotFound),
            Some(round) if round.spinning => Err(GameError::BettingClosed),
            Some(round) if Utc::now() >= round.window_end => Err(GameError::BettingClosed),
            Some(_) => Ok(()),
        }
    }

    fn open_round(&self) {
        let window_end = Utc::now()
            + chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::minutes(10));
        *self.round.lock().expect("roulette round lock") = Some(Round {
            bets: Vec::new(),
            spinning: false,
            window_end,
        });
        tracing::info!(%window_end, "roulette round open");
    }

    /// Close the round, draw the result, pay winners and announce.
    async fn spin(&self, channel: &ChannelId) {
        let bets = {
            let mut guard = self.round.lock().expect("roulette round lock");
            let Some(round) = guard.as_mut() else {
                return;
            };
            if round.spinning {
                return;
            }
            round.spinning = true;
            std::mem::take(&mut round.bets)
        };

        let result: u8 = rand::thread_rng().gen_range(0..=36);
        let color = color_of(result);
        tracing::info!(result, ?color, bets = bets.len(), "roulette spin");

        let total_wagered: Coins = bets.iter().map(|b| b.amount).sum();
        let mut profits: HashMap<PlayerId, Coins> = HashMap::new();
        for placed in &bets {
            if placed.bet.wins(result) {
                let credit = winnings(placed.amount, &placed.bet);
                if let Err(e) = self.ledger.deposit(&placed.player, credit).await {
                    tracing::error!(player = %placed.player, credit, error = %e, "roulette payout failed");
                    continue;
                }
                self.metrics.record_payout(credit);
                *profits.entry(placed.player.clone()).or_insert(0) += credit - placed.amount;
            }
        }

        let winners = if profits.is_empty() {
            "No winners this round.".to_string()
        } else {
            profits
                .iter()
                .map(|(player, profit)| format!("{player}: +{profit}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let view = GameView::new(
            "ROULETTE - Result",
            format!(
                "The ball landed on {result} ({color:?}).\n\nWinners:\n{winners}\n\nBets: {} | Wagered: {total_wagered}",
                bets.len()
            ),
            match color {
                RouletteColor::Red => Tone::Danger,
                RouletteColor::Black => Tone::Info,
                RouletteColor::Green => Tone::Success,
            },
        );
        let _ = self.gateway.announce(channel, &view).await;
    }

    async fn announce_open(&self, channel: &ChannelId) {
        let Some(info) = self.round_info() else {
            return;
        };
        let view = GameView::new(
            "ROULETTE - Betting open!",
            format!(
                "Place your bets! The wheel spins at {}.\nStraight 35:1 | red/black 1:1 | even/odd 1:1 | low/high 1:1 | dozen 2:1\nMinimum bet: {}",
                info.window_end.format("%H:%M:%S"),
                self.min_bet
            ),
            Tone::Success,
        );
        let _ = self.gateway.announce(channel, &view).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NoopGateway;
    use crate::ledger::MemoryLedger;

    #[test]
    fn color_table_matches_the_wheel() {
        assert_eq!(color_of(0), RouletteColor::Green);
        assert_eq!(color_of(1), RouletteColor::Red);
        assert_eq!(color_of(2), RouletteColor::Black);
        assert_eq!(color_of(10), RouletteColor::Black);
        assert_eq!(color_of(11), RouletteColor::Black);
        assert_eq!(color_of(18), RouletteColor::Red);
        assert_eq!(color_of(19), RouletteColor::Red);
        assert_eq!(color_of(28), RouletteColor::Black);
        assert_eq!(color_of(29), RouletteColor::Black);
        assert_eq!(color_of(36), RouletteColor::Red);
    }

    #[test]
    fn zero_loses_every_outside_bet() {
        assert!(!RouletteBet::Color(RouletteColor::Red).wins(0));
        assert!(!RouletteBet::Color(RouletteColor::Black).wins(0));
        assert!(!RouletteBet::Parity(Parity::Even).wins(0));
        assert!(!RouletteBet::Parity(Parity::Odd).wins(0));
        assert!(!RouletteBet::Half(Half::Low).wins(0));
        assert!(!RouletteBet::Dozen(Dozen::First).wins(0));
        assert!(RouletteBet::Straight(0).wins(0));
    }

    #[test]
    fn bet_coverage_boundaries() {
        assert!(RouletteBet::Half(Half::Low).wins(18));
        assert!(!RouletteBet::Half(Half::Low).wins(19));
        assert!(RouletteBet::Half(Half::High).wins(19));
        assert!(RouletteBet::Dozen(Dozen::First).wins(12));
        assert!(RouletteBet::Dozen(Dozen::Second).wins(13));
        assert!(RouletteBet::Dozen(Dozen::Second).wins(24));
        assert!(RouletteBet::Dozen(Dozen::Third).wins(25));
        assert!(RouletteBet::Parity(Parity::Even).wins(2));
        assert!(RouletteBet::Parity(Parity::Odd).wins(35));
    }

    #[test]
    fn winnings_return_stake_plus_profit() {
        // 100 on red, result 1 (red): pays 200 total.
        let bet = RouletteBet::Color(RouletteColor::Red);
        assert!(bet.wins(1));
        assert_eq!(winnings(100, &bet), 200);

        assert_eq!(winnings(100, &RouletteBet::Straight(17)), 3_600);
        assert_eq!(winnings(100, &RouletteBet::Dozen(Dozen::First)), 300);
    }

    #[test]
    fn green_color_bet_is_invalid() {
        assert!(RouletteBet::Color(RouletteColor::Green).validate().is_err());
        assert!(RouletteBet::Straight(37).validate().is_err());
        assert!(RouletteBet::Straight(36).validate().is_ok());
    }

    fn wheel_fixture() -> (Arc<RouletteWheel>, Arc<MemoryLedger>) {
        let config = ArenaConfig::default();
        let ledger = Arc::new(MemoryLedger::new());
        let wheel = RouletteWheel::new(
            &config,
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::new(NoopGateway::new()),
            Arc::new(MetricsRecorder::new()),
        );
        (wheel, ledger)
    }

    #[tokio::test]
    async fn bet_rejected_once_spinning() {
        let (wheel, ledger) = wheel_fixture();
        let player = "p1".to_string();
        ledger.set_balance(&player, 1_000);

        wheel.open_round();
        wheel
            .place_bet(player.clone(), RouletteBet::Color(RouletteColor::Red), 100)
            .await
            .unwrap();
        assert_eq!(ledger.balance(&player).await.unwrap(), 900);

        // Mark the round spinning the way the scheduler does.
        wheel
            .round
            .lock()
            .unwrap()
            .as_mut()
            .expect("round open")
            .spinning = true;

        let err = wheel
            .place_bet(player.clone(), RouletteBet::Color(RouletteColor::Red), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::BettingClosed));
        // The rejected bet never touched the balance.
        assert_eq!(ledger.balance(&player).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn bet_without_a_round_is_rejected() {
        let (wheel, ledger) = wheel_fixture();
        let player = "p1".to_string();
        ledger.set_balance(&player, 1_000);

        let err = wheel
            .place_bet(player, RouletteBet::Color(RouletteColor::Red), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::NotFound));
    }

    #[tokio::test]
    async fn spin_pays_winners_and_only_winners() {
        let (wheel, ledger) = wheel_fixture();
        let red = "red-better".to_string();
        let black = "black-better".to_string();
        ledger.set_balance(&red, 500);
        ledger.set_balance(&black, 500);

        wheel.open_round();
        wheel
            .place_bet(red.clone(), RouletteBet::Color(RouletteColor::Red), 100)
            .await
            .unwrap();
        wheel
            .place_bet(black.clone(), RouletteBet::Color(RouletteColor::Black), 100)
            .await
            .unwrap();

        wheel.spin(&"lobby".to_string()).await;

        let red_after = ledger.balance(&red).await.unwrap();
        let black_after = ledger.balance(&black).await.unwrap();
        // A color pays 1:1, so each player either lost the stake or
        // doubled it; zero makes both lose.
        assert!(red_after == 400 || red_after == 600);
        assert!(black_after == 400 || black_after == 600);
        assert!(!(red_after == 600 && black_after == 600));
        // The house never pays out more than the winning side's stake
        // plus its 1:1 profit.
        let total_delta = (red_after - 500) + (black_after - 500);
        assert!(total_delta <= 0);
    }

    #[tokio::test]
    async fn multiple_bets_per_player_allowed() {
        let (wheel, ledger) = wheel_fixture();
        let player = "p1".to_string();
        ledger.set_balance(&player, 1_000);

        wheel.open_round();
        wheel
            .place_bet(player.clone(), RouletteBet::Straight(7), 50)
            .await
            .unwrap();
        wheel
            .place_bet(player.clone(), RouletteBet::Color(RouletteColor::Black), 50)
            .await
            .unwrap();
        assert_eq!(ledger.balance(&player).await.unwrap(), 900);
    }
}
