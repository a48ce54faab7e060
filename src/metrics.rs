//! Settlement and activity counters.

use crate::games::types::GameType;
use crate::Coins;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// In-process counters incremented at wager and settlement sites.
#[derive(Default)]
pub struct MetricsRecorder {
    games_played: DashMap<GameType, u64>,
    coins_wagered: AtomicI64,
    coins_paid_out: AtomicI64,
    total_games: AtomicU64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_wager(&self, game: GameType, amount: Coins) {
        self.coins_wagered.fetch_add(amount, Ordering::SeqCst);
        *self.games_played.entry(game).or_insert(0) += 1;
        self.total_games.fetch_add(1, Ordering::SeqCst);
    }

    /// Extra stake added to an already-counted game (double-down,
    /// insurance).
    pub fn record_additional_wager(&self, amount: Coins) {
        self.coins_wagered.fetch_add(amount, Ordering::SeqCst);
    }

    pub fn record_payout(&self, amount: Coins) {
        self.coins_paid_out.fetch_add(amount, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_games: self.total_games.load(Ordering::SeqCst),
            coins_wagered: self.coins_wagered.load(Ordering::SeqCst),
            coins_paid_out: self.coins_paid_out.load(Ordering::SeqCst),
        }
    }

    pub fn games_played(&self, game: GameType) -> u64 {
        self.games_played.get(&game).map(|c| *c).unwrap_or(0)
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_games: u64,
    pub coins_wagered: Coins,
    pub coins_paid_out: Coins,
}

impl MetricsSnapshot {
    /// Net house take so far.
    pub fn house_profit(&self) -> Coins {
        self.coins_wagered - self.coins_paid_out
    }
}
