//! Peer-to-peer loan book.
//!
//! An offer sits pending for a short accept window; acceptance transfers
//! the principal atomically and schedules collection at the due date. A
//! loan is paid exactly once, by the borrower or by the collector, and a
//! borrower who cannot cover the debt at the due date is force-debited
//! into a negative balance for the remainder.

use crate::config::ArenaConfig;
use crate::gateway::{Action, Control, GameView, Gateway, LoanAction, Tone};
use crate::ledger::Ledger;
use crate::{ChannelId, Coins, GameError, GameResult, MessageRef, PlayerId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Loan {
    pub id: String,
    pub lender: PlayerId,
    pub borrower: PlayerId,
    pub principal: Coins,
    /// Interest rate in percent.
    pub interest_rate: f64,
    pub due_date: DateTime<Utc>,
    pub total_owed: Coins,
    pub paid: bool,
}

struct PendingOffer {
    id: Uuid,
    loan: Loan,
    channel: ChannelId,
    message: Option<MessageRef>,
}

pub struct LoanBook {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    accept_window: Duration,
    max_interest_rate: f64,
    max_term_days: i64,
    loans: DashMap<String, Arc<Mutex<Loan>>>,
    pending: DashMap<PlayerId, PendingOffer>,
}

impl LoanBook {
    pub fn new(
        config: &ArenaConfig,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn Gateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            gateway,
            accept_window: config.timing.loan_accept(),
            max_interest_rate: config.loans.max_interest_rate,
            max_term_days: config.loans.max_term_days,
            loans: DashMap::new(),
            pending: DashMap::new(),
        })
    }

    /// Offer a loan to another player. Expires unanswered after the
    /// accept window.
    pub async fn offer(
        self: Arc<Self>,
        lender: PlayerId,
        borrower: PlayerId,
        principal: Coins,
        interest_rate: f64,
        term_days: i64,
        channel: ChannelId,
    ) -> GameResult<String> {
        if lender == borrower {
            return Err(GameError::SelfTarget);
        }
        if principal <= 0 {
            return Err(GameError::InvalidBet("amount must be positive".to_string()));
        }
        if !(0.0..=self.max_interest_rate).contains(&interest_rate) {
            return Err(GameError::InvalidBet(format!(
                "interest rate must be between 0 and {}",
                self.max_interest_rate
            )));
        }
        if term_days < 1 || term_days > self.max_term_days {
            return Err(GameError::InvalidBet(format!(
                "term must be between 1 and {} days",
                self.max_term_days
            )));
        }
        if self.pending.contains_key(&borrower) {
            return Err(GameError::PendingRequest);
        }
        if self.ledger.balance(&lender).await? < principal {
            return Err(GameError::InsufficientFunds);
        }

        let interest = (principal as f64 * interest_rate / 100.0) as Coins;
        let loan = Loan {
            id: Uuid::new_v4().to_string(),
            lender: lender.clone(),
            borrower: borrower.clone(),
            principal,
            interest_rate,
            due_date: Utc::now() + chrono::Duration::days(term_days),
            total_owed: principal + interest,
            paid: false,
        };
        let loan_id = loan.id.clone();
        let offer_id = Uuid::new_v4();

        let view = GameView::new(
            "Loan offer",
            format!(
                "{lender} offers {borrower} a loan.\nAmount: {principal} | Interest: {interest_rate:.1}% | Total to repay: {} | Due: {}",
                loan.total_owed,
                loan.due_date.format("%Y-%m-%d %H:%M"),
            ),
            Tone::Highlight,
        )
        .with_controls(vec![
            Control::new("Accept", Action::Loan(LoanAction::Accept)),
            Control::new("Decline", Action::Loan(LoanAction::Decline)),
        ]);
        let message = self
            .gateway
            .render_initial(&channel, &borrower, &view)
            .await
            .ok();

        self.pending.insert(
            borrower.clone(),
            PendingOffer {
                id: offer_id,
                loan,
                channel,
                message,
            },
        );

        let book = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::time::sleep(book.accept_window).await;
            book.expire_offer(&borrower, offer_id).await;
        });

        Ok(loan_id)
    }

    async fn expire_offer(&self, borrower: &PlayerId, offer_id: Uuid) {
        let Some((_, offer)) = self
            .pending
            .remove_if(borrower, |_, pending| pending.id == offer_id)
        else {
            return;
        };
        tracing::info!(lender = %offer.loan.lender, %borrower, "loan offer expired");
        let view = GameView::new(
            "Loan offer expired",
            format!("{borrower} did not respond in time."),
            Tone::Info,
        );
        self.finish_message(&offer.message, &offer.channel, &view)
            .await;
    }

    pub async fn handle(self: Arc<Self>, player: PlayerId, action: LoanAction) -> GameResult<()> {
        match action {
            LoanAction::Accept => self.accept(player).await.map(|_| ()),
            LoanAction::Decline => self.decline(player).await,
        }
    }

    /// Accept a pending offer: the principal moves lender -> borrower
    /// atomically and collection is scheduled at the due date.
    pub async fn accept(self: Arc<Self>, borrower: PlayerId) -> GameResult<String> {
        let Some((_, offer)) = self.pending.remove(&borrower) else {
            return Err(GameError::NotFound);
        };
        let PendingOffer {
            loan,
            channel,
            message,
            ..
        } = offer;

        // The lender's balance may have moved since the offer went out;
        // the transfer is the authoritative check.
        if let Err(e) = self
            .ledger
            .transfer(&loan.lender, &loan.borrower, loan.principal)
            .await
        {
            tracing::info!(lender = %loan.lender, error = %e, "loan funding failed");
            let view = GameView::new(
                "Loan cancelled",
                format!("{} no longer has sufficient balance.", loan.lender),
                Tone::Danger,
            );
            self.finish_message(&message, &channel, &view).await;
            return Err(e.into());
        }

        let loan_id = loan.id.clone();
        let due_date = loan.due_date;
        tracing::info!(
            loan = %loan_id,
            lender = %loan.lender,
            %borrower,
            principal = loan.principal,
            total_owed = loan.total_owed,
            "loan accepted"
        );

        let view = GameView::new(
            "Loan accepted",
            format!(
                "{borrower} received {} from {}.\nTotal to repay: {} by {}.",
                loan.principal,
                loan.lender,
                loan.total_owed,
                due_date.format("%Y-%m-%d %H:%M"),
            ),
            Tone::Success,
        );
        self.finish_message(&message, &channel, &view).await;

        self.loans
            .insert(loan_id.clone(), Arc::new(Mutex::new(loan)));
        self.schedule_collection(loan_id.clone(), due_date, channel);
        Ok(loan_id)
    }

    async fn decline(&self, borrower: PlayerId) -> GameResult<()> {
        let Some((_, offer)) = self.pending.remove(&borrower) else {
            return Err(GameError::NotFound);
        };
        let view = GameView::new(
            "Loan declined",
            format!("{borrower} declined the loan offer."),
            Tone::Info,
        );
        self.finish_message(&offer.message, &offer.channel, &view)
            .await;
        Ok(())
    }

    /// Repay a loan manually. With no id given, the borrower's first
    /// outstanding loan is paid.
    pub async fn pay(
        &self,
        borrower: &PlayerId,
        loan_id: Option<&str>,
    ) -> GameResult<Coins> {
        let loan = match loan_id {
            Some(id) => {
                let loan = self
                    .loans
                    .get(id)
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or(GameError::NotFound)?;
                if loan.lock().await.borrower != *borrower {
                    return Err(GameError::NotAuthorized);
                }
                loan
            }
            None => self
                .loans_for(borrower)
                .await
                .into_iter()
                .find(|loan| loan.borrower == *borrower && !loan.paid)
                .and_then(|loan| self.loans.get(&loan.id).map(|e| Arc::clone(e.value())))
                .ok_or(GameError::NotFound)?,
        };

        let mut loan = loan.lock().await;
        if loan.paid {
            return Err(GameError::NotFound);
        }
        self.ledger
            .transfer(&loan.borrower, &loan.lender, loan.total_owed)
            .await?;
        loan.paid = true;
        let paid = loan.total_owed;
        let id = loan.id.clone();
        let lender = loan.lender.clone();
        drop(loan);
        self.loans.remove(&id);
        tracing::info!(loan = %id, %borrower, %lender, paid, "loan repaid");
        Ok(paid)
    }

    /// Active loans the player is a side of.
    pub async fn loans_for(&self, player: &PlayerId) -> Vec<Loan> {
        let mut result = Vec::new();
        let handles: Vec<Arc<Mutex<Loan>>> = self
            .loans
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            let loan = handle.lock().await;
            if !loan.paid && (loan.borrower == *player || loan.lender == *player) {
                result.push(loan.clone());
            }
        }
        result.sort_by_key(|loan| loan.due_date);
        result
    }

    fn schedule_collection(
        self: Arc<Self>,
        loan_id: String,
        due_date: DateTime<Utc>,
        channel: ChannelId,
    ) {
        let book = Arc::clone(&self);
        tokio::spawn(async move {
            let wait = (due_date - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            book.collect(&loan_id, &channel).await;
        });
    }

    /// Due-date collection: full transfer when funds suffice, otherwise
    /// everything the borrower has plus a forced debt for the rest.
    async fn collect(&self, loan_id: &str, channel: &ChannelId) {
        let Some(handle) = self.loans.get(loan_id).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let mut loan = handle.lock().await;
        if loan.paid {
            return;
        }

        let balance = match self.ledger.balance(&loan.borrower).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!(loan = %loan_id, error = %e, "loan collection balance check failed");
                return;
            }
        };

        let view = if balance >= loan.total_owed {
            if let Err(e) = self
                .ledger
                .transfer(&loan.borrower, &loan.lender, loan.total_owed)
                .await
            {
                tracing::error!(loan = %loan_id, error = %e, "loan auto-collection failed");
                return;
            }
            tracing::info!(loan = %loan_id, collected = loan.total_owed, "loan auto-collected");
            GameView::new(
                "Loan auto-collected",
                format!(
                    "{} paid {} to {}. Loan settled.",
                    loan.borrower, loan.total_owed, loan.lender
                ),
                Tone::Success,
            )
        } else {
            // Default: take what exists, the rest becomes debt.
            let collected = balance.max(0);
            if collected > 0 {
                if let Err(e) = self
                    .ledger
                    .transfer(&loan.borrower, &loan.lender, collected)
                    .await
                {
                    tracing::error!(loan = %loan_id, error = %e, "partial loan collection failed");
                    return;
                }
            }
            let remaining = loan.total_owed - collected;
            if let Err(e) = self.ledger.deposit(&loan.borrower, -remaining).await {
                tracing::error!(loan = %loan_id, error = %e, "loan debt booking failed");
                return;
            }
            tracing::warn!(loan = %loan_id, collected, remaining, "loan defaulted");
            GameView::new(
                "Loan defaulted",
                format!(
                    "{} could not cover the loan.\nCollected {collected} for {}; remaining debt of {remaining} charged.",
                    loan.borrower, loan.lender
                ),
                Tone::Danger,
            )
        };

        loan.paid = true;
        let id = loan.id.clone();
        drop(loan);
        self.loans.remove(&id);
        let _ = self.gateway.announce(channel, &view).await;
    }

    async fn finish_message(
        &self,
        message: &Option<MessageRef>,
        channel: &ChannelId,
        view: &GameView,
    ) {
        match message {
            Some(handle) => {
                let _ = self.gateway.render_terminal(handle, view).await;
            }
            None => {
                let _ = self.gateway.announce(channel, view).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NoopGateway;
    use crate::ledger::MemoryLedger;

    struct Fixture {
        book: Arc<LoanBook>,
        ledger: Arc<MemoryLedger>,
    }

    fn fixture() -> Fixture {
        let config = ArenaConfig::default();
        let ledger = Arc::new(MemoryLedger::new());
        let book = LoanBook::new(
            &config,
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::new(NoopGateway::new()),
        );
        Fixture { book, ledger }
    }

    #[tokio::test]
    async fn offer_validations() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 500);

        assert!(matches!(
            f.book
                .clone()
                .offer(lender.clone(), lender.clone(), 100, 10.0, 7, "bank".to_string())
                .await,
            Err(GameError::SelfTarget)
        ));
        assert!(f
            .book
            .clone()
            .offer(lender.clone(), borrower.clone(), 0, 10.0, 7, "bank".to_string())
            .await
            .is_err());
        assert!(f
            .book
            .clone()
            .offer(lender.clone(), borrower.clone(), 100, 150.0, 7, "bank".to_string())
            .await
            .is_err());
        assert!(f
            .book
            .clone()
            .offer(lender.clone(), borrower.clone(), 100, 10.0, 400, "bank".to_string())
            .await
            .is_err());
        assert!(matches!(
            f.book
                .clone()
                .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 7, "bank".to_string())
                .await,
            Err(GameError::InsufficientFunds)
        ));

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 100, 10.0, 7, "bank".to_string())
            .await
            .unwrap();
        assert!(matches!(
            f.book
                .clone()
                .offer(lender.clone(), borrower.clone(), 100, 10.0, 7, "bank".to_string())
                .await,
            Err(GameError::PendingRequest)
        ));
    }

    #[tokio::test]
    async fn accept_transfers_principal_and_registers_loan() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 1_000);

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 7, "bank".to_string())
            .await
            .unwrap();
        let loan_id = f.book.clone().accept(borrower.clone()).await.unwrap();

        assert_eq!(f.ledger.balance(&lender).await.unwrap(), 0);
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 1_000);

        let loans = f.book.loans_for(&borrower).await;
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].id, loan_id);
        assert_eq!(loans[0].total_owed, 1_100);
        assert!(!loans[0].paid);
    }

    #[tokio::test]
    async fn accept_fails_when_lender_funds_vanished() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 1_000);

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 7, "bank".to_string())
            .await
            .unwrap();
        f.ledger.set_balance(&lender, 50);

        assert!(matches!(
            f.book.clone().accept(borrower.clone()).await,
            Err(GameError::InsufficientFunds)
        ));
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 0);
        assert!(f.book.loans_for(&borrower).await.is_empty());
    }

    #[tokio::test]
    async fn manual_payment_settles_once() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 1_000);
        f.ledger.set_balance(&borrower, 500);

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 7, "bank".to_string())
            .await
            .unwrap();
        let loan_id = f.book.clone().accept(borrower.clone()).await.unwrap();

        let paid = f.book.pay(&borrower, Some(&loan_id)).await.unwrap();
        assert_eq!(paid, 1_100);
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 400);
        assert_eq!(f.ledger.balance(&lender).await.unwrap(), 1_100);

        // Already settled: a second payment finds nothing.
        assert!(matches!(
            f.book.pay(&borrower, Some(&loan_id)).await,
            Err(GameError::NotFound)
        ));
    }

    #[tokio::test]
    async fn payment_requires_funds() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 1_000);

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 7, "bank".to_string())
            .await
            .unwrap();
        f.book.clone().accept(borrower.clone()).await.unwrap();

        // Borrower has the principal (1000) but owes 1100.
        assert!(matches!(
            f.book.pay(&borrower, None).await,
            Err(GameError::InsufficientFunds)
        ));
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_collection_at_due_date() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 1_000);
        f.ledger.set_balance(&borrower, 200);

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 1, "bank".to_string())
            .await
            .unwrap();
        f.book.clone().accept(borrower.clone()).await.unwrap();
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 1_200);

        // Past the due date the collector takes the full 1100.
        tokio::time::sleep(Duration::from_secs(86_400 + 60)).await;

        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 100);
        assert_eq!(f.ledger.balance(&lender).await.unwrap(), 1_100);
        assert!(f.book.loans_for(&borrower).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn default_leaves_negative_balance() {
        let f = fixture();
        let lender = "lender".to_string();
        let borrower = "borrower".to_string();
        f.ledger.set_balance(&lender, 1_000);

        f.book
            .clone()
            .offer(lender.clone(), borrower.clone(), 1_000, 10.0, 1, "bank".to_string())
            .await
            .unwrap();
        f.book.clone().accept(borrower.clone()).await.unwrap();
        // Borrower burns most of the principal before the due date.
        f.ledger.withdraw(&borrower, 700).await.unwrap();
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), 300);

        tokio::time::sleep(Duration::from_secs(86_400 + 60)).await;

        // Collected 300, remaining 800 booked as debt.
        assert_eq!(f.ledger.balance(&lender).await.unwrap(), 300);
        assert_eq!(f.ledger.balance(&borrower).await.unwrap(), -800);
        // collected + debt == total owed
        assert_eq!(300 + 800, 1_100);
        assert!(f.book.loans_for(&borrower).await.is_empty());
    }
}
