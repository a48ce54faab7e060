//! The account-balance service backing every wager and settlement.
//!
//! The ledger is the sole arbiter of balance consistency: engines treat
//! an [`LedgerError::InsufficientFunds`] at debit time as authoritative
//! even when an earlier balance check passed.

use crate::errors::LedgerError;
use crate::{Coins, PlayerId};
use async_trait::async_trait;
use dashmap::DashMap;

/// Atomic balance operations consumed by the game engines.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current balance. Missing accounts read as zero.
    async fn balance(&self, player: &PlayerId) -> Result<Coins, LedgerError>;

    /// Credit (or, with a negative amount, force-debit) an account.
    /// Negative amounts may push the balance below zero; this is how
    /// defaulted loans become debt.
    async fn deposit(&self, player: &PlayerId, amount: Coins) -> Result<(), LedgerError>;

    /// Debit an account, failing with `InsufficientFunds` when the
    /// balance cannot cover the amount. Nothing changes on failure.
    async fn withdraw(&self, player: &PlayerId, amount: Coins) -> Result<(), LedgerError>;

    /// Move funds between accounts. Succeeds only when the source can
    /// cover the amount; otherwise neither side is modified.
    async fn transfer(
        &self,
        from: &PlayerId,
        to: &PlayerId,
        amount: Coins,
    ) -> Result<(), LedgerError>;
}

/// In-memory ledger used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryLedger {
    accounts: DashMap<PlayerId, Coins>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account balance, replacing any existing value.
    pub fn set_balance(&self, player: impl Into<PlayerId>, amount: Coins) {
        self.accounts.insert(player.into(), amount);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn balance(&self, player: &PlayerId) -> Result<Coins, LedgerError> {
        Ok(self.accounts.get(player).map(|b| *b).unwrap_or(0))
    }

    async fn deposit(&self, player: &PlayerId, amount: Coins) -> Result<(), LedgerError> {
        let mut entry = self.accounts.entry(player.clone()).or_insert(0);
        *entry += amount;
        Ok(())
    }

    async fn withdraw(&self, player: &PlayerId, amount: Coins) -> Result<(), LedgerError> {
        let mut entry = self.accounts.entry(player.clone()).or_insert(0);
        if *entry < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        *entry -= amount;
        Ok(())
    }

    async fn transfer(
        &self,
        from: &PlayerId,
        to: &PlayerId,
        amount: Coins,
    ) -> Result<(), LedgerError> {
        // The withdraw is the only fallible step, so failure leaves both
        // accounts untouched.
        self.withdraw(from, amount).await?;
        self.deposit(to, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_accounts_read_as_zero() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.balance(&"ghost".to_string()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn withdraw_rejects_overdraft() {
        let ledger = MemoryLedger::new();
        let alice = "alice".to_string();
        ledger.set_balance(&alice, 50);

        let err = ledger.withdraw(&alice, 100).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds));
        assert_eq!(ledger.balance(&alice).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn transfer_moves_funds_atomically() {
        let ledger = MemoryLedger::new();
        let (a, b) = ("a".to_string(), "b".to_string());
        ledger.set_balance(&a, 300);

        ledger.transfer(&a, &b, 200).await.unwrap();
        assert_eq!(ledger.balance(&a).await.unwrap(), 100);
        assert_eq!(ledger.balance(&b).await.unwrap(), 200);

        // Failed transfer modifies neither side.
        assert!(ledger.transfer(&a, &b, 500).await.is_err());
        assert_eq!(ledger.balance(&a).await.unwrap(), 100);
        assert_eq!(ledger.balance(&b).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn negative_deposit_creates_debt() {
        let ledger = MemoryLedger::new();
        let debtor = "debtor".to_string();
        ledger.set_balance(&debtor, 30);

        ledger.deposit(&debtor, -100).await.unwrap();
        assert_eq!(ledger.balance(&debtor).await.unwrap(), -70);
    }
}
