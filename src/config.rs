//! Configuration for the game core.
//!
//! Plain structs with validated defaults; loading them from disk or
//! environment is the host's concern.

use crate::Coins;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration consumed by [`crate::Arcade`].
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ArenaConfig {
    pub bets: BetLimits,
    pub timing: TimingConfig,
    pub roulette: RouletteConfig,
    pub events: EventConfig,
    pub loans: LoanConfig,
}

/// Minimum wager per game type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BetLimits {
    pub crash_min: Coins,
    pub cups_min: Coins,
    pub blackjack_min: Coins,
    pub slots_min: Coins,
    pub roulette_min: Coins,
    pub duel_min: Coins,
    pub event_min: Coins,
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            crash_min: 100,
            cups_min: 50,
            blackjack_min: 100,
            slots_min: 10,
            roulette_min: 50,
            duel_min: 50,
            event_min: 10,
        }
    }
}

/// Timer windows driving forced resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Crash multiplier tick period, milliseconds.
    pub crash_tick_ms: u64,
    /// Cup-guess window per round, seconds. Expiry forces a loss.
    pub guess_window_secs: u64,
    /// Post-win continue/cash-out window, seconds. Expiry auto-cashes out.
    pub decision_window_secs: u64,
    /// Blackjack idle timeout, seconds. Expiry forfeits the wager.
    pub blackjack_idle_secs: u64,
    /// Duel challenge accept window, seconds.
    pub duel_accept_secs: u64,
    /// Loan offer accept window, seconds.
    pub loan_accept_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            crash_tick_ms: 1_000,
            guess_window_secs: 120,
            decision_window_secs: 60,
            blackjack_idle_secs: 120,
            duel_accept_secs: 30,
            loan_accept_secs: 60,
        }
    }
}

impl TimingConfig {
    pub fn crash_tick(&self) -> Duration {
        Duration::from_millis(self.crash_tick_ms)
    }

    pub fn guess_window(&self) -> Duration {
        Duration::from_secs(self.guess_window_secs)
    }

    pub fn decision_window(&self) -> Duration {
        Duration::from_secs(self.decision_window_secs)
    }

    pub fn blackjack_idle(&self) -> Duration {
        Duration::from_secs(self.blackjack_idle_secs)
    }

    pub fn duel_accept(&self) -> Duration {
        Duration::from_secs(self.duel_accept_secs)
    }

    pub fn loan_accept(&self) -> Duration {
        Duration::from_secs(self.loan_accept_secs)
    }
}

/// Scheduled roulette wheel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouletteConfig {
    pub enabled: bool,
    /// Betting window between spins, minutes.
    pub interval_minutes: u64,
}

impl Default for RouletteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 10,
        }
    }
}

impl RouletteConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Event-betting market settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventConfig {
    /// Fraction of the pool retained by the house.
    pub house_edge: f64,
    pub min_options: usize,
    pub max_options: usize,
    /// Longest allowed betting window, minutes.
    pub max_duration_minutes: i64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.05,
            min_options: 2,
            max_options: 10,
            max_duration_minutes: 1_440,
        }
    }
}

/// Loan book settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoanConfig {
    /// Highest accepted interest rate, percent.
    pub max_interest_rate: f64,
    /// Longest accepted term, days.
    pub max_term_days: i64,
}

impl Default for LoanConfig {
    fn default() -> Self {
        Self {
            max_interest_rate: 100.0,
            max_term_days: 365,
        }
    }
}

impl ArenaConfig {
    /// Short windows for interactive testing; semantics unchanged.
    pub fn fast() -> Self {
        Self {
            timing: TimingConfig {
                crash_tick_ms: 50,
                guess_window_secs: 5,
                decision_window_secs: 3,
                blackjack_idle_secs: 5,
                duel_accept_secs: 2,
                loan_accept_secs: 2,
            },
            roulette: RouletteConfig {
                enabled: true,
                interval_minutes: 1,
            },
            ..Default::default()
        }
    }

    /// Validate logical consistency before wiring the core together.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let minimums = [
            self.bets.crash_min,
            self.bets.cups_min,
            self.bets.blackjack_min,
            self.bets.slots_min,
            self.bets.roulette_min,
            self.bets.duel_min,
            self.bets.event_min,
        ];
        if minimums.iter().any(|&m| m <= 0) {
            return Err(ConfigValidationError::InvalidValue(
                "all minimum bets must be > 0".to_string(),
            ));
        }

        if self.timing.crash_tick_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "crash_tick_ms must be > 0".to_string(),
            ));
        }

        if self.roulette.enabled && self.roulette.interval_minutes == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "roulette interval_minutes must be > 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.events.house_edge) {
            return Err(ConfigValidationError::InvalidValue(
                "house_edge must be in [0, 1)".to_string(),
            ));
        }

        if self.events.min_options < 2 || self.events.max_options < self.events.min_options {
            return Err(ConfigValidationError::LogicalInconsistency(
                "event option bounds must satisfy 2 <= min <= max".to_string(),
            ));
        }

        if self.loans.max_term_days <= 0 || self.loans.max_interest_rate < 0.0 {
            return Err(ConfigValidationError::InvalidValue(
                "loan limits must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ArenaConfig::default().validate().is_ok());
    }

    #[test]
    fn fast_config_is_valid() {
        assert!(ArenaConfig::fast().validate().is_ok());
    }

    #[test]
    fn zero_minimum_bet_rejected() {
        let mut config = ArenaConfig::default();
        config.bets.slots_min = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn house_edge_out_of_range_rejected() {
        let mut config = ArenaConfig::default();
        config.events.house_edge = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_accessors() {
        let config = ArenaConfig::default();
        assert_eq!(config.timing.crash_tick(), Duration::from_secs(1));
        assert_eq!(config.roulette.interval(), Duration::from_secs(600));
    }
}
