//! Live game sessions and the active-player tracker.
//!
//! Each game type owns a [`SessionStore`] mapping a player to their single
//! live session. The store doubles as the delivery point for button
//! events: [`SessionStore::dispatch`] performs a non-blocking send into
//! the session's capacity-1 input channel, so a second click arriving
//! while the engine is mid-transition is dropped instead of queued.

use crate::gateway::Action;
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Live state of one in-progress game for one player.
pub struct Session {
    pub player: PlayerId,
    pub wager: Coins,
    pub channel: ChannelId,
    pub created_at: Instant,
    input: mpsc::Sender<Action>,
}

/// Per-game-type map of live sessions.
///
/// All operations touch the map only; nothing here awaits a ledger or
/// gateway call while holding a shard lock.
pub struct SessionStore {
    game: &'static str,
    sessions: DashMap<PlayerId, Session>,
}

impl SessionStore {
    pub fn new(game: &'static str) -> Self {
        Self {
            game,
            sessions: DashMap::new(),
        }
    }

    /// Register a session and hand back the engine's end of its input
    /// channel. Fails when the player already has one for this game.
    pub fn open(
        &self,
        player: &PlayerId,
        wager: Coins,
        channel: &ChannelId,
    ) -> GameResult<mpsc::Receiver<Action>> {
        let (tx, rx) = mpsc::channel(1);
        let session = Session {
            player: player.clone(),
            wager,
            channel: channel.clone(),
            created_at: Instant::now(),
            input: tx,
        };

        match self.sessions.entry(player.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GameError::AlreadyActive),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(rx)
            }
        }
    }

    /// Remove a session. Safe to call on an already-removed player.
    pub fn close(&self, player: &PlayerId) {
        self.sessions.remove(player);
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.sessions.contains_key(player)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Deliver a player action to their live session.
    ///
    /// Returns `NotFound` when no session exists. A session that is not
    /// currently waiting (channel full) swallows the action silently;
    /// that is how stale double-clicks die.
    pub fn dispatch(&self, player: &PlayerId, action: Action) -> GameResult<()> {
        let Some(session) = self.sessions.get(player) else {
            return Err(GameError::NotFound);
        };
        if session.input.try_send(action).is_err() {
            tracing::debug!(game = self.game, %player, "dropped action for busy session");
        }
        Ok(())
    }
}

/// Shared set of players currently inside any game.
///
/// Queue-routed games are marked by the queue worker for the duration of
/// the job; duels mark both participants. Unrelated features use
/// [`ActivePlayers::wait_until_idle`] to defer side effects until a
/// player's game concludes.
#[derive(Default)]
pub struct ActivePlayers {
    counts: DashMap<PlayerId, u32>,
}

impl ActivePlayers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark(&self, player: &PlayerId) {
        *self.counts.entry(player.clone()).or_insert(0) += 1;
    }

    pub fn unmark(&self, player: &PlayerId) {
        if let Some(mut entry) = self.counts.get_mut(player) {
            let remaining = entry.saturating_sub(1);
            *entry = remaining;
            if remaining == 0 {
                drop(entry);
                self.counts.remove_if(player, |_, count| *count == 0);
            }
        }
    }

    pub fn is_active(&self, player: &PlayerId) -> bool {
        self.counts.get(player).map(|c| *c > 0).unwrap_or(false)
    }

    /// Poll until the player has no live game.
    pub async fn wait_until_idle(&self, player: &PlayerId) {
        while self.is_active(player) {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}
