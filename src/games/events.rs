//! Event-betting market.
//!
//! Admin-created events with 2-10 named options. One bet per player per
//! event across all options. The pool (minus the house edge) is divided
//! among winning bettors in proportion to their stake; floor rounding
//! leaves any remainder with the house, and a winning option nobody
//! backed hands the house the whole pool.

use crate::config::ArenaConfig;
use crate::gateway::{GameView, Gateway, Tone};
use crate::games::types::GameType;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Odds shown for an option nobody has backed yet.
const EMPTY_OPTION_ODDS: f64 = 99.99;

/// Resolved events linger this long for result queries before removal.
const RESOLVED_RETENTION: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone)]
pub struct EventOption {
    pub name: String,
    pub total_bets: u32,
    pub total_amount: Coins,
}

#[derive(Debug, Clone, Copy)]
struct EventBet {
    option: usize,
    amount: Coins,
}

struct BettingEvent {
    question: String,
    options: Vec<EventOption>,
    bets: HashMap<PlayerId, EventBet>,
    total_pool: Coins,
    creator: PlayerId,
    channel: ChannelId,
    closes_at: DateTime<Utc>,
    closed: bool,
    winner: Option<usize>,
}

impl BettingEvent {
    fn expire_if_due(&mut self) {
        if !self.closed && Utc::now() >= self.closes_at {
            self.closed = true;
        }
    }

    fn odds(&self, house_edge: f64) -> Vec<f64> {
        if self.total_pool == 0 {
            return vec![1.0; self.options.len()];
        }
        let pool_after_edge = self.total_pool as f64 * (1.0 - house_edge);
        self.options
            .iter()
            .map(|option| {
                if option.total_amount == 0 {
                    EMPTY_OPTION_ODDS
                } else {
                    pool_after_edge / option.total_amount as f64
                }
            })
            .collect()
    }
}

/// Public snapshot of one event.
#[derive(Debug, Clone)]
pub struct EventSummary {
    pub id: String,
    pub question: String,
    pub options: Vec<EventOption>,
    pub odds: Vec<f64>,
    pub total_pool: Coins,
    pub closes_at: DateTime<Utc>,
    pub closed: bool,
    pub winner: Option<usize>,
}

/// Outcome of resolving an event.
#[derive(Debug, Clone)]
pub struct EventResolution {
    pub winning_option: String,
    /// Net profit per winning player (stake already included in the
    /// credited amount).
    pub profits: HashMap<PlayerId, Coins>,
    pub distributed: Coins,
    pub house_take: Coins,
}

pub struct EventBook {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    min_bet: Coins,
    house_edge: f64,
    min_options: usize,
    max_options: usize,
    max_duration_minutes: i64,
    events: DashMap<String, Arc<Mutex<BettingEvent>>>,
}

impl EventBook {
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
            min_bet: config.bets.event_min,
            house_edge: config.events.house_edge,
            min_options: config.events.min_options,
            max_options: config.events.max_options,
            max_duration_minutes: config.events.max_duration_minutes,
            events: DashMap::new(),
        })
    }

    /// Create a betting event. Closes on its own when the window ends.
    pub async fn create_event(
        self: Arc<Self>,
        creator: PlayerId,
        question: String,
        options: Vec<String>,
        duration_minutes: i64,
        channel: ChannelId,
    ) -> GameResult<String> {
        if options.len() < self.min_options {
            return Err(GameError::InvalidBet(format!(
                "need at least {} options",
                self.min_options
            )));
        }
        if options.len() > self.max_options {
            return Err(GameError::InvalidBet(format!(
                "maximum {} options allowed",
                self.max_options
            )));
        }
        if duration_minutes < 1 || duration_minutes > self.max_duration_minutes {
            return Err(GameError::InvalidBet(format!(
                "duration must be between 1 and {} minutes",
                self.max_duration_minutes
            )));
        }
        let question = question.trim().to_string();
        if question.len() < 5 || question.len() > 200 {
            return Err(GameError::InvalidBet(
                "question must be between 5 and 200 characters".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let event = BettingEvent {
            question,
            options: options
                .into_iter()
                .map(|name| EventOption {
                    name: name.trim().to_string(),
                    total_bets: 0,
                    total_amount: 0,
                })
                .collect(),
            bets: HashMap::new(),
            total_pool: 0,
            creator,
            channel: channel.clone(),
            closes_at: Utc::now() + chrono::Duration::minutes(duration_minutes),
            closed: false,
            winner: None,
        };
        self.events.insert(id.clone(), Arc::new(Mutex::new(event)));
        tracing::info!(event = %id, duration_minutes, "betting event created");

        if let Some(summary) = self.summary(&id) {
            let _ = self
                .gateway
                .announce(&channel, &Self::event_view(&summary))
                .await;
        }

        let book = Arc::clone(&self);
        let event_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration_minutes as u64 * 60)).await;
            book.auto_close(&event_id).await;
        });

        Ok(id)
    }

    /// Place the player's single bet on this event.
    pub async fn place_bet(
        &self,
        player: PlayerId,
        event_id: &str,
        option: usize,
        amount: Coins,
    ) -> GameResult<()> {
        if amount < self.min_bet {
            return Err(GameError::BetBelowMinimum { min: self.min_bet });
        }
        let event = self.get(event_id)?;

        // Fast gate before the debit.
        {
            let mut event = event.lock().expect("event lock");
            event.expire_if_due();
            if event.closed {
                return Err(GameError::BettingClosed);
            }
            if option >= event.options.len() {
                return Err(GameError::InvalidBet("no such option".to_string()));
            }
            if event.bets.contains_key(&player) {
                return Err(GameError::AlreadyBet);
            }
        }

        self.ledger.withdraw(&player, amount).await?;

        // The window may have closed while the debit ran.
        {
            let mut event = event.lock().expect("event lock");
            event.expire_if_due();
            if event.closed || event.bets.contains_key(&player) {
                drop(event);
                let _ = self.ledger.deposit(&player, amount).await;
                return Err(GameError::BettingClosed);
            }
            event.bets.insert(player.clone(), EventBet { option, amount });
            event.options[option].total_bets += 1;
            event.options[option].total_amount += amount;
            event.total_pool += amount;
        }

        self.metrics.record_wager(GameType::EventBetting, amount);
        tracing::info!(%player, event = %event_id, option, amount, "event bet placed");
        Ok(())
    }

    /// Close betting early. Creator only.
    pub async fn close_event(&self, caller: &PlayerId, event_id: &str) -> GameResult<()> {
        let event = self.get(event_id)?;
        {
            let mut event = event.lock().expect("event lock");
            if event.creator != *caller {
                return Err(GameError::NotAuthorized);
            }
            event.closed = true;
        }
        self.announce_closed(event_id).await;
        Ok(())
    }

    async fn auto_close(&self, event_id: &str) {
        let Ok(event) = self.get(event_id) else {
            return;
        };
        let had_bets = {
            let mut event = event.lock().expect("event lock");
            if event.closed {
                return;
            }
            event.closed = true;
            !event.bets.is_empty()
        };
        tracing::info!(event = %event_id, "betting event auto-closed");
        if had_bets {
            self.announce_closed(event_id).await;
        }
    }

    async fn announce_closed(&self, event_id: &str) {
        let Ok(event) = self.get(event_id) else {
            return;
        };
        let (channel, question, total_pool, total_bets) = {
            let event = event.lock().expect("event lock");
            (
                event.channel.clone(),
                event.question.clone(),
                event.total_pool,
                event.bets.len(),
            )
        };
        let view = GameView::new(
            "Betting closed",
            format!(
                "{question}\n\nBetting is now closed. Waiting for the result.\nTotal pool: {total_pool} | Bets: {total_bets}"
            ),
            Tone::Info,
        );
        let _ = self.gateway.announce(&channel, &view).await;
    }

    /// Set the winning option and distribute the pool. Creator only,
    /// once, and only after betting closed.
    pub async fn set_result(
        self: Arc<Self>,
        caller: &PlayerId,
        event_id: &str,
        winning_option: usize,
    ) -> GameResult<EventResolution> {
        let event = self.get(event_id)?;

        let (resolution, credits, channel) = {
            let mut event = event.lock().expect("event lock");
            if event.creator != *caller {
                return Err(GameError::NotAuthorized);
            }
            event.expire_if_due();
            if !event.closed {
                return Err(GameError::StillOpen);
            }
            if event.winner.is_some() {
                return Err(GameError::ResultAlreadySet);
            }
            if winning_option >= event.options.len() {
                return Err(GameError::InvalidBet("no such option".to_string()));
            }

            event.winner = Some(winning_option);
            let winner = &event.options[winning_option];

            let mut credits: Vec<(PlayerId, Coins)> = Vec::new();
            let mut profits = HashMap::new();
            let mut distributed: Coins = 0;

            if winner.total_amount > 0 {
                let pool_after_edge =
                    (event.total_pool as f64 * (1.0 - self.house_edge)) as Coins;
                for (player, bet) in &event.bets {
                    if bet.option != winning_option {
                        continue;
                    }
                    let share = bet.amount as f64 / winner.total_amount as f64;
                    let winnings = (share * pool_after_edge as f64).floor() as Coins;
                    credits.push((player.clone(), winnings));
                    profits.insert(player.clone(), winnings - bet.amount);
                    distributed += winnings;
                }
            }

            let resolution = EventResolution {
                winning_option: winner.name.clone(),
                profits,
                distributed,
                house_take: event.total_pool - distributed,
            };
            (resolution, credits, event.channel.clone())
        };

        for (player, winnings) in &credits {
            if let Err(e) = self.ledger.deposit(player, *winnings).await {
                tracing::error!(%player, winnings, error = %e, "event payout failed");
                continue;
            }
            self.metrics.record_payout(*winnings);
        }
        tracing::info!(
            event = %event_id,
            winners = credits.len(),
            distributed = resolution.distributed,
            house_take = resolution.house_take,
            "event resolved"
        );

        let winners_text = if resolution.profits.is_empty() {
            "No winners. House keeps the pool.".to_string()
        } else {
            resolution
                .profits
                .iter()
                .map(|(player, profit)| format!("{player}: {profit:+}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let view = GameView::new(
            "Event result",
            format!(
                "Winner: {}\n\n{winners_text}\n\nDistributed {} | House kept {}",
                resolution.winning_option, resolution.distributed, resolution.house_take
            ),
            Tone::Highlight,
        );
        let _ = self.gateway.announce(&channel, &view).await;

        // Keep the resolved event around for a while, then drop it.
        let book = Arc::clone(&self);
        let event_id = event_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(RESOLVED_RETENTION).await;
            book.events.remove(&event_id);
        });

        Ok(resolution)
    }

    pub fn summary(&self, event_id: &str) -> Option<EventSummary> {
        let event = self.events.get(event_id)?;
        let event = event.lock().expect("event lock");
        Some(EventSummary {
            id: event_id.to_string(),
            question: event.question.clone(),
            options: event.options.clone(),
            odds: event.odds(self.house_edge),
            total_pool: event.total_pool,
            closes_at: event.closes_at,
            closed: event.closed || Utc::now() >= event.closes_at,
            winner: event.winner,
        })
    }

    pub fn list_events(&self) -> Vec<EventSummary> {
        // Collect ids first; summary() re-enters the map.
        let ids: Vec<String> = self.events.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter_map(|id| self.summary(id)).collect()
    }

    fn get(&self, event_id: &str) -> GameResult<Arc<Mutex<BettingEvent>>> {
        self.events
            .get(event_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(GameError::NotFound)
    }

    fn event_view(summary: &EventSummary) -> GameView {
        let options = summary
            .options
            .iter()
            .zip(&summary.odds)
            .enumerate()
            .map(|(i, (option, odds))| {
                let odds_text = if *odds >= 99.0 {
                    "inf".to_string()
                } else {
                    format!("{odds:.2}x")
                };
                format!(
                    "{}. {} - odds {odds_text} | {} bets ({})",
                    i + 1,
                    option.name,
                    option.total_bets,
                    option.total_amount
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        GameView::new(
            summary.question.clone(),
            format!("Total pool: {}\n\n{options}", summary.total_pool),
            Tone::Success,
        )
    }
}
