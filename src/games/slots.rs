//! Slot machine engine.
//!
//! Queue-routed and single-shot: the job debits the wager, spins three
//! independently weighted reels, settles, and renders the result. No
//! input loop.

use crate::config::ArenaConfig;
use crate::gateway::{GameView, Gateway, Tone};
use crate::games::types::GameType;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::queue::{GameJob, TurnQueue};
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use rand::Rng;
use std::sync::Arc;

/// The reel strip. Weights sum to 100; values are the jackpot
/// multipliers.
const SYMBOLS: [SlotSymbol; 6] = [
    SlotSymbol {
        name: "cherry",
        glyph: "\u{1F352}",
        value: 2,
        weight: 35,
    },
    SlotSymbol {
        name: "lemon",
        glyph: "\u{1F34B}",
        value: 3,
        weight: 25,
    },
    SlotSymbol {
        name: "orange",
        glyph: "\u{1F34A}",
        value: 4,
        weight: 20,
    },
    SlotSymbol {
        name: "bell",
        glyph: "\u{1F514}",
        value: 6,
        weight: 12,
    },
    SlotSymbol {
        name: "diamond",
        glyph: "\u{1F48E}",
        value: 10,
        weight: 6,
    },
    SlotSymbol {
        name: "seven",
        glyph: "7",
        value: 25,
        weight: 2,
    },
];

/// Two-match wins pay `value * TWO_MATCH_FACTOR`, floored at the wager.
const TWO_MATCH_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSymbol {
    pub name: &'static str,
    pub glyph: &'static str,
    pub value: u32,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinKind {
    Jackpot,
    TwoMatch,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinResult {
    pub reels: [SlotSymbol; 3],
    pub kind: SpinKind,
    pub multiplier: f64,
    pub win: Coins,
}

/// Pick one symbol by walking cumulative weights over a uniform draw.
fn weighted_symbol(rng: &mut impl Rng) -> SlotSymbol {
    let total: u32 = SYMBOLS.iter().map(|s| s.weight).sum();
    let mut roll = rng.gen_range(0..total);
    for symbol in SYMBOLS {
        if roll < symbol.weight {
            return symbol;
        }
        roll -= symbol.weight;
    }
    SYMBOLS[0]
}

/// Spin three reels and settle against the payout rules.
pub fn spin(wager: Coins, rng: &mut impl Rng) -> SpinResult {
    let reels = [
        weighted_symbol(rng),
        weighted_symbol(rng),
        weighted_symbol(rng),
    ];
    let [r1, r2, r3] = reels;

    if r1.name == r2.name && r2.name == r3.name {
        let multiplier = r1.value as f64;
        return SpinResult {
            reels,
            kind: SpinKind::Jackpot,
            multiplier,
            win: (wager as f64 * multiplier) as Coins,
        };
    }

    if r1.name == r2.name || r2.name == r3.name || r1.name == r3.name {
        let matched = if r1.name == r2.name || r1.name == r3.name {
            r1
        } else {
            r2
        };
        let multiplier = matched.value as f64 * TWO_MATCH_FACTOR;
        let win = ((wager as f64 * multiplier) as Coins).max(wager);
        return SpinResult {
            reels,
            kind: SpinKind::TwoMatch,
            multiplier,
            win,
        };
    }

    SpinResult {
        reels,
        kind: SpinKind::Miss,
        multiplier: 0.0,
        win: 0,
    }
}

pub struct SlotsEngine {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    min_bet: Coins,
}

impl SlotsEngine {
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
            min_bet: config.bets.slots_min,
        })
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
        if self.ledger.balance(&player).await? < wager {
            return Err(GameError::InsufficientFunds);
        }

        let engine = Arc::clone(&self);
        let gateway = Arc::clone(&self.gateway);
        let queued_channel = channel.clone();
        let queued_player = player.clone();

        let job = GameJob::new(player.clone(), move |guard| async move {
            engine.run_spin(player, wager, channel).await;
            drop(guard);
        })
        .notify_queued(move |position| {
            tokio::spawn(async move {
                let view = GameView::new(
                    "Queued",
                    format!("{queued_player} queued for slots (position #{position})."),
                    Tone::Info,
                );
                let _ = gateway.announce(&queued_channel, &view).await;
            });
        });

        queue.enqueue(job)
    }

    async fn run_spin(&self, player: PlayerId, wager: Coins, channel: ChannelId) {
        if let Err(e) = self.ledger.withdraw(&player, wager).await {
            tracing::info!(%player, error = %e, "slots wager refused after queue wait");
            let view = GameView::new(
                "Slots",
                format!("{player} ran out of funds while waiting in the queue."),
                Tone::Danger,
            );
            let _ = self.gateway.announce(&channel, &view).await;
            return;
        }
        self.metrics.record_wager(GameType::Slots, wager);

        let result = spin(wager, &mut rand::thread_rng());

        let view = Self::result_view(&player, wager, &result);
        if let Err(e) = self.gateway.render_initial(&channel, &player, &view).await {
            // The reels landed but nobody saw them: refund rather than
            // settle an invisible result.
            tracing::warn!(%player, error = %e, "slots render failed, refunding");
            let _ = self.ledger.deposit(&player, wager).await;
            return;
        }

        if result.win > 0 {
            if let Err(e) = self.ledger.deposit(&player, result.win).await {
                tracing::error!(%player, win = result.win, error = %e, "slots payout failed");
            }
            self.metrics.record_payout(result.win);
        }
        tracing::info!(%player, wager, win = result.win, kind = ?result.kind, "slots spin settled");
    }

    fn result_view(player: &PlayerId, wager: Coins, result: &SpinResult) -> GameView {
        let reels = format!(
            "{} | {} | {}",
            result.reels[0].glyph, result.reels[1].glyph, result.reels[2].glyph
        );
        match result.kind {
            SpinKind::Jackpot => GameView::new(
                "JACKPOT!",
                format!(
                    "{player} hit the jackpot!\n{reels}\nBet: {wager} | Multiplier: {:.1}x | Won: {}",
                    result.multiplier, result.win
                ),
                Tone::Highlight,
            ),
            SpinKind::TwoMatch => GameView::new(
                "WINNER!",
                format!(
                    "{player} got a match!\n{reels}\nBet: {wager} | Multiplier: {:.1}x | Won: {}",
                    result.multiplier, result.win
                ),
                Tone::Success,
            ),
            SpinKind::Miss => GameView::new(
                "No luck!",
                format!("{player} spun the reels...\n{reels}\nBet: {wager} | No match this time."),
                Tone::Danger,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn weights_sum_to_one_hundred() {
        let total: u32 = SYMBOLS.iter().map(|s| s.weight).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn weighted_draw_respects_the_table() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..100_000 {
            *counts.entry(weighted_symbol(&mut rng).name).or_insert(0u32) += 1;
        }
        // Common symbols dominate rare ones by construction.
        assert!(counts["cherry"] > counts["diamond"]);
        assert!(counts["diamond"] > counts["seven"]);
        assert!(counts["seven"] > 0);
    }

    #[test]
    fn jackpot_pays_symbol_value_exactly() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50_000 {
            let result = spin(100, &mut rng);
            if result.kind == SpinKind::Jackpot {
                let value = result.reels[0].value as i64;
                assert_eq!(result.win, 100 * value);
            }
        }
    }

    #[test]
    fn two_match_never_pays_below_the_wager() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut seen_two_match = false;
        for _ in 0..50_000 {
            let result = spin(100, &mut rng);
            if result.kind == SpinKind::TwoMatch {
                seen_two_match = true;
                assert!(result.win >= 100);
            }
        }
        assert!(seen_two_match);
    }

    #[test]
    fn miss_pays_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let result = spin(100, &mut rng);
            if result.kind == SpinKind::Miss {
                assert_eq!(result.win, 0);
                return;
            }
        }
        panic!("no miss in 10k spins");
    }

    #[test]
    fn two_match_uses_the_matching_symbol() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50_000 {
            let result = spin(1_000, &mut rng);
            if result.kind == SpinKind::TwoMatch {
                let [r1, r2, r3] = result.reels;
                let matched = if r1.name == r2.name || r1.name == r3.name {
                    r1
                } else {
                    r2
                };
                let expected =
                    ((1_000.0 * matched.value as f64 * TWO_MATCH_FACTOR) as Coins).max(1_000);
                assert_eq!(result.win, expected);
            }
        }
    }
}
