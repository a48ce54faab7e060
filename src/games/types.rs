//! Shared game type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported game types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Crash,
    Cups,
    Blackjack,
    Slots,
    Roulette,
    Duel,
    EventBetting,
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameType::Crash => write!(f, "crash"),
            GameType::Cups => write!(f, "cups"),
            GameType::Blackjack => write!(f, "blackjack"),
            GameType::Slots => write!(f, "slots"),
            GameType::Roulette => write!(f, "roulette"),
            GameType::Duel => write!(f, "duel"),
            GameType::EventBetting => write!(f, "events"),
        }
    }
}

/// Terminal outcome of a single-player round, as settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Push,
}
