//! Crash game engine.
//!
//! One round per player, routed through the global turn queue. The wager
//! is at risk the moment the round begins; a failure to deliver the
//! initial game message refunds it unconditionally.
//!
//! The round loop is a single task selecting between the multiplier tick
//! and the player's cash-out. The crash check is authoritative at every
//! decision point: a cash-out whose multiplier already reached the crash
//! point resolves as crashed no matter when the button landed.

use crate::config::ArenaConfig;
use crate::gateway::{Action, Control, CrashAction, GameView, Gateway, Tone};
use crate::games::types::GameType;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::queue::{GameJob, TurnQueue};
use crate::session::SessionStore;
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Multiplier growth per second of flight.
const MULTIPLIER_RATE: f64 = 0.1;

/// Probability of an early crash point in [1.0, 1.5).
const EARLY_CRASH_CHANCE: f64 = 0.40;

/// Crash points are clamped to this range.
const CRASH_POINT_MIN: f64 = 1.0;
const CRASH_POINT_MAX: f64 = 100.0;

/// Draw a crash point from the mixed distribution: 40% early crashes
/// uniform in [1.0, 1.5), otherwise the heavy tail `0.96 / (1 - r)`,
/// clamped to [1.0, 100.0].
pub fn draw_crash_point(rng: &mut impl Rng) -> f64 {
    let point = if rng.gen::<f64>() < EARLY_CRASH_CHANCE {
        1.0 + rng.gen::<f64>() * 0.5
    } else {
        0.96 / (1.0 - rng.gen::<f64>())
    };
    point.clamp(CRASH_POINT_MIN, CRASH_POINT_MAX)
}

/// Pure state of one crash round.
#[derive(Debug, Clone, Copy)]
pub struct CrashRound {
    wager: Coins,
    crash_point: f64,
}

/// How a round resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrashOutcome {
    CashedOut { multiplier: f64, payout: Coins },
    Crashed { crash_point: f64 },
}

impl CrashRound {
    pub fn new(wager: Coins, crash_point: f64) -> Self {
        Self { wager, crash_point }
    }

    /// Multiplier after `elapsed` seconds of flight.
    pub fn multiplier_at(elapsed: Duration) -> f64 {
        1.0 + elapsed.as_secs_f64() * MULTIPLIER_RATE
    }

    pub fn crash_point(&self) -> f64 {
        self.crash_point
    }

    pub fn crashed_at(&self, elapsed: Duration) -> bool {
        Self::multiplier_at(elapsed) >= self.crash_point
    }

    /// Resolve a cash-out request arriving at `elapsed`. The crash is
    /// authoritative: a press past the crash instant pays nothing.
    pub fn cash_out(&self, elapsed: Duration) -> CrashOutcome {
        if self.crashed_at(elapsed) {
            return CrashOutcome::Crashed {
                crash_point: self.crash_point,
            };
        }
        let multiplier = Self::multiplier_at(elapsed);
        CrashOutcome::CashedOut {
            multiplier,
            payout: (self.wager as f64 * multiplier).floor() as Coins,
        }
    }
}

pub struct CrashEngine {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    sessions: SessionStore,
    min_bet: Coins,
    tick: Duration,
}

impl CrashEngine {
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
            sessions: SessionStore::new("crash"),
            min_bet: config.bets.crash_min,
            tick: config.timing.crash_tick(),
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Validate the bet and enqueue a round on the global turn queue.
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
        // Fast-fail check; the debit inside the job is authoritative.
        if self.ledger.balance(&player).await? < wager {
            return Err(GameError::InsufficientFunds);
        }

        let engine = Arc::clone(&self);
        let gateway = Arc::clone(&self.gateway);
        let queued_channel = channel.clone();
        let queued_player = player.clone();

        let job = GameJob::new(player.clone(), move |guard| async move {
            engine.run_round(player, wager, channel).await;
            drop(guard);
        })
        .notify_queued(move |position| {
            tokio::spawn(async move {
                let view = GameView::new(
                    "Queued",
                    format!("{queued_player} is position #{position} in the game queue."),
                    Tone::Info,
                );
                let _ = gateway.announce(&queued_channel, &view).await;
            });
        });

        queue.enqueue(job)
    }

    async fn run_round(&self, player: PlayerId, wager: Coins, channel: ChannelId) {
        // The balance may have drained while the job waited in line.
        if let Err(e) = self.ledger.withdraw(&player, wager).await {
            tracing::info!(%player, error = %e, "crash wager refused after queue wait");
            let view = GameView::new(
                "Crash",
                format!("{player} ran out of funds while waiting in the queue."),
                Tone::Danger,
            );
            let _ = self.gateway.announce(&channel, &view).await;
            return;
        }

        let mut rx = match self.sessions.open(&player, wager, &channel) {
            Ok(rx) => rx,
            Err(_) => {
                // Wager already debited: refund before bailing.
                let _ = self.ledger.deposit(&player, wager).await;
                return;
            }
        };
        self.metrics.record_wager(GameType::Crash, wager);

        let round = CrashRound::new(wager, draw_crash_point(&mut rand::thread_rng()));

        let view = GameView::new(
            "Crash - taking off",
            format!("Bet: {wager}\nPreparing for takeoff..."),
            Tone::Info,
        )
        .with_controls(vec![Control::new(
            "CASH OUT",
            Action::Crash(CrashAction::CashOut),
        )]);

        let message = match self.gateway.render_initial(&channel, &player, &view).await {
            Ok(message) => message,
            Err(e) => {
                // No session without a wager, no wager without a session:
                // a failed initial render refunds unconditionally.
                tracing::warn!(%player, error = %e, "crash initial render failed, refunding");
                let _ = self.ledger.deposit(&player, wager).await;
                self.sessions.close(&player);
                return;
            }
        };

        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                action = rx.recv() => {
                    if !matches!(action, Some(Action::Crash(CrashAction::CashOut))) {
                        continue;
                    }
                    let elapsed = started.elapsed();
                    match round.cash_out(elapsed) {
                        CrashOutcome::Crashed { crash_point } => {
                            self.finish_crashed(&message, crash_point).await;
                        }
                        CrashOutcome::CashedOut { multiplier, payout } => {
                            if let Err(e) = self.ledger.deposit(&player, payout).await {
                                tracing::error!(%player, payout, error = %e, "crash payout failed");
                            }
                            self.metrics.record_payout(payout);
                            tracing::info!(%player, wager, payout, multiplier, "crash cash-out");
                            let view = GameView::new(
                                "CASHED OUT!",
                                format!("Jumped at x{multiplier:.2}\nPayout: +{payout}"),
                                Tone::Success,
                            );
                            let _ = self.gateway.render_terminal(&message, &view).await;
                        }
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if round.crashed_at(elapsed) {
                        self.finish_crashed(&message, round.crash_point()).await;
                        break;
                    }
                    let multiplier = CrashRound::multiplier_at(elapsed);
                    let potential = (wager as f64 * multiplier) as Coins;
                    let view = GameView::new(
                        "Crash - flying",
                        format!("Multiplier: x{multiplier:.2}\nPotential win: {potential}"),
                        Tone::Info,
                    )
                    .with_controls(vec![Control::new(
                        "CASH OUT",
                        Action::Crash(CrashAction::CashOut),
                    )]);
                    let _ = self.gateway.render_update(&message, &view).await;
                }
            }
        }

        self.sessions.close(&player);
    }

    async fn finish_crashed(&self, message: &crate::MessageRef, crash_point: f64) {
        let view = GameView::new(
            "CRASHED",
            format!("Crashed at x{crash_point:.2}"),
            Tone::Danger,
        );
        let _ = self.gateway.render_terminal(message, &view).await;
    }
}
