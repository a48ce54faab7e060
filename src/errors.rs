//! Error types for the game core.
//!
//! One enum per concern, combined into [`GameError`] at the engine surface.

use crate::Coins;
use thiserror::Error;

/// Errors surfaced by the ledger collaborator.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The source account cannot cover the requested amount.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The ledger backend failed for an unrelated reason.
    #[error("ledger backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced by the presentation gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to deliver game message: {0}")]
    Delivery(String),
}

/// Root error type for all game operations.
#[derive(Debug, Error)]
pub enum GameError {
    /// Bet rejected before any funds moved.
    #[error("minimum bet is {min}")]
    BetBelowMinimum { min: Coins },

    /// Structurally invalid request (bad option, bad range, bad target).
    #[error("invalid bet: {0}")]
    InvalidBet(String),

    /// The ledger refused the debit. Authoritative regardless of any
    /// earlier balance check that passed.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The player already has a live session for this game type.
    #[error("player already has an active game")]
    AlreadyActive,

    /// No live session, round, event or offer matches the request.
    #[error("no active game found")]
    NotFound,

    /// The betting window for a shared round has closed.
    #[error("betting is closed")]
    BettingClosed,

    /// The event cannot be resolved while bets are still open.
    #[error("betting is still open")]
    StillOpen,

    /// The player already placed their one bet on this event.
    #[error("already placed a bet on this event")]
    AlreadyBet,

    /// An action on a turn a different player owns.
    #[error("not your turn")]
    NotYourTurn,

    /// The target player already has a pending challenge or offer.
    #[error("target already has a pending request")]
    PendingRequest,

    /// Challenges and offers cannot target the issuing player.
    #[error("cannot target yourself")]
    SelfTarget,

    /// Only the creator may resolve this event.
    #[error("not authorized")]
    NotAuthorized,

    /// The result for this event was already set.
    #[error("result already set")]
    ResultAlreadySet,

    /// The global turn queue is at capacity.
    #[error("game queue is full")]
    QueueFull,

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl From<LedgerError> for GameError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => GameError::InsufficientFunds,
            other => GameError::Ledger(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_flattens_into_game_error() {
        let err: GameError = LedgerError::InsufficientFunds.into();
        assert!(matches!(err, GameError::InsufficientFunds));
    }

    #[test]
    fn backend_errors_stay_wrapped() {
        let err: GameError = LedgerError::Backend("db down".to_string()).into();
        match err {
            GameError::Ledger(LedgerError::Backend(msg)) => assert_eq!(msg, "db down"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
