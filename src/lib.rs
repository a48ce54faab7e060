//! coinarena - virtual-economy casino game core.
//!
//! The concurrent game-session and queueing subsystem behind a chat-bot
//! casino: per-player game state machines driven by asynchronous button
//! events, a global FIFO turn queue serializing the queue-routed games,
//! and atomic wager settlement against an injected ledger.
//!
//! The chat platform, persistence and HTTP surfaces are collaborators
//! behind the [`gateway::Gateway`] and [`ledger::Ledger`] traits; this
//! crate owns everything between a validated bet and a settled balance.

pub mod config;
pub mod errors;
pub mod games;
pub mod gateway;
pub mod ledger;
pub mod loans;
pub mod metrics;
pub mod queue;
pub mod session;

pub use config::ArenaConfig;
pub use errors::{GameError, GameResult, GatewayError, LedgerError};

use crate::config::ConfigValidationError;
use crate::games::blackjack::BlackjackEngine;
use crate::games::crash::CrashEngine;
use crate::games::cups::CupsEngine;
use crate::games::duel::DuelArena;
use crate::games::events::EventBook;
use crate::games::roulette::RouletteWheel;
use crate::games::slots::SlotsEngine;
use crate::games::types::GameType;
use crate::gateway::{Action, Gateway, PlayerAction};
use crate::ledger::Ledger;
use crate::loans::LoanBook;
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::queue::TurnQueue;
use crate::session::ActivePlayers;
use std::sync::Arc;

/// Player identifier as issued by the chat platform.
pub type PlayerId = String;

/// Channel identifier for game messages and announcements.
pub type ChannelId = String;

/// Handle to a rendered game message, for later updates.
pub type MessageRef = String;

/// Currency amount. Signed: loan defaults push balances negative.
pub type Coins = i64;

/// The wired game core: engines, turn queue, session stores and shared
/// services, constructed once at startup.
///
/// Must be created inside a tokio runtime; the queue worker and the
/// scheduled games spawn their tasks on it.
pub struct Arcade {
    queue: TurnQueue,
    players: Arc<ActivePlayers>,
    metrics: Arc<MetricsRecorder>,
    crash: Arc<CrashEngine>,
    cups: Arc<CupsEngine>,
    blackjack: Arc<BlackjackEngine>,
    slots: Arc<SlotsEngine>,
    roulette: Arc<RouletteWheel>,
    duels: Arc<DuelArena>,
    events: Arc<EventBook>,
    loans: Arc<LoanBook>,
}

impl Arcade {
    pub fn new(
        config: ArenaConfig,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn Gateway>,
    ) -> Result<Self, ConfigValidationError> {
        config.validate()?;

        let metrics = Arc::new(MetricsRecorder::new());
        let players = ActivePlayers::new();
        let queue = TurnQueue::start(Arc::clone(&players));

        let crash = CrashEngine::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        );
        let cups = CupsEngine::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        );
        let blackjack = BlackjackEngine::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        );
        let slots = SlotsEngine::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        );
        let roulette = RouletteWheel::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        );
        let duels = DuelArena::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
            Arc::clone(&players),
        );
        let events = EventBook::new(
            &config,
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&metrics),
        );
        let loans = LoanBook::new(&config, Arc::clone(&ledger), Arc::clone(&gateway));

        Ok(Self {
            queue,
            players,
            metrics,
            crash,
            cups,
            blackjack,
            slots,
            roulette,
            duels,
            events,
            loans,
        })
    }

    /// Start a queue-routed game for a player. The other game types have
    /// their own entry points ([`Arcade::roulette`], [`Arcade::duels`],
    /// [`Arcade::events`], [`Arcade::loans`]).
    pub async fn start_game(
        &self,
        game: GameType,
        player: PlayerId,
        wager: Coins,
        channel: ChannelId,
    ) -> GameResult<()> {
        match game {
            GameType::Crash => {
                Arc::clone(&self.crash)
                    .start(&self.queue, player, wager, channel)
                    .await
            }
            GameType::Cups => {
                Arc::clone(&self.cups)
                    .start(&self.queue, player, wager, channel)
                    .await
            }
            GameType::Blackjack => {
                Arc::clone(&self.blackjack)
                    .start(&self.queue, player, wager, channel)
                    .await
            }
            GameType::Slots => {
                Arc::clone(&self.slots)
                    .start(&self.queue, player, wager, channel)
                    .await
            }
            GameType::Roulette | GameType::Duel | GameType::EventBetting => Err(
                GameError::InvalidBet(format!("{game} is not started through the turn queue")),
            ),
        }
    }

    /// Route a decoded player action to the engine that owns it.
    pub async fn dispatch(&self, action: PlayerAction) -> GameResult<()> {
        let PlayerAction { player, action } = action;
        match action {
            Action::Crash(_) => self.crash.sessions().dispatch(&player, action),
            Action::Cups(_) => self.cups.sessions().dispatch(&player, action),
            Action::Blackjack(_) => self.blackjack.sessions().dispatch(&player, action),
            Action::Duel(duel_action) => {
                Arc::clone(&self.duels).handle(player, duel_action).await
            }
            Action::Loan(loan_action) => {
                Arc::clone(&self.loans).handle(player, loan_action).await
            }
        }
    }

    pub fn is_player_active(&self, player: &PlayerId) -> bool {
        self.players.is_active(player)
    }

    /// Block until the player's running game (if any) concludes. Used by
    /// features that must not fire mid-game.
    pub async fn wait_until_idle(&self, player: &PlayerId) {
        self.players.wait_until_idle(player).await;
    }

    /// Jobs waiting in the turn queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Open the scheduled roulette wheel, announcing rounds in `channel`.
    pub fn start_roulette(&self, channel: ChannelId) {
        Arc::clone(&self.roulette).start(channel);
    }

    pub fn stop_roulette(&self) {
        self.roulette.stop();
    }

    pub fn roulette(&self) -> &Arc<RouletteWheel> {
        &self.roulette
    }

    pub fn duels(&self) -> &Arc<DuelArena> {
        &self.duels
    }

    pub fn events(&self) -> &Arc<EventBook> {
        &self.events
    }

    pub fn loans(&self) -> &Arc<LoanBook> {
        &self.loans
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
