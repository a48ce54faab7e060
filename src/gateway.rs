//! The presentation gateway boundary.
//!
//! The core never talks to a chat platform directly. It renders a
//! [`GameView`] through the [`Gateway`] trait and receives player input as
//! a [`PlayerAction`] whose [`Action`] was decoded from the platform's
//! button identifiers *before* reaching any engine. Engines never parse
//! strings.

use crate::errors::GatewayError;
use crate::{ChannelId, MessageRef, PlayerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A rendered snapshot of one game's state.
///
/// Hosts map this onto whatever their platform supports (embeds, plain
/// text, web widgets); the core only guarantees the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    pub title: String,
    pub body: String,
    pub tone: Tone,
    /// Interactive controls offered to the player. Empty on terminal
    /// views: rendering a view with no controls removes them.
    pub controls: Vec<Control>,
}

impl GameView {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tone: Tone) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tone,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }
}

/// Visual register of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Info,
    Success,
    Danger,
    Highlight,
}

/// A button the player can press, carrying the decoded action it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub label: String,
    pub action: Action,
}

impl Control {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// A decoded player input, tagged with the game it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "game", content = "action", rename_all = "lowercase")]
pub enum Action {
    Crash(CrashAction),
    Cups(CupsAction),
    Blackjack(BlackjackAction),
    Duel(DuelAction),
    Loan(LoanAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashAction {
    CashOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CupsAction {
    /// Guess a cup, 1 through 6.
    Pick(u8),
    CashOut,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlackjackAction {
    Hit,
    Stand,
    DoubleDown,
    Insurance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelAction {
    Accept,
    Decline,
    Shoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanAction {
    Accept,
    Decline,
}

/// An action paired with the player who issued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAction {
    pub player: PlayerId,
    pub action: Action,
}

/// Rendering operations consumed by the engines.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Post the first view of a game and return a handle for updates.
    async fn render_initial(
        &self,
        channel: &ChannelId,
        player: &PlayerId,
        view: &GameView,
    ) -> Result<MessageRef, GatewayError>;

    /// Replace the content of an earlier message.
    async fn render_update(
        &self,
        message: &MessageRef,
        view: &GameView,
    ) -> Result<(), GatewayError>;

    /// Replace the content of an earlier message and strip its controls.
    async fn render_terminal(
        &self,
        message: &MessageRef,
        view: &GameView,
    ) -> Result<(), GatewayError>;

    /// Fire-and-forget channel announcement (queue positions, round
    /// results, expiry notices).
    async fn announce(&self, channel: &ChannelId, view: &GameView) -> Result<(), GatewayError>;
}

/// Gateway that renders nothing. Useful for headless operation and tests
/// that only care about settlement.
#[derive(Default)]
pub struct NoopGateway {
    counter: std::sync::atomic::AtomicU64,
}

impl NoopGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Gateway for NoopGateway {
    async fn render_initial(
        &self,
        _channel: &ChannelId,
        _player: &PlayerId,
        _view: &GameView,
    ) -> Result<MessageRef, GatewayError> {
        let id = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(format!("msg-{id}"))
    }

    async fn render_update(
        &self,
        _message: &MessageRef,
        _view: &GameView,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn render_terminal(
        &self,
        _message: &MessageRef,
        _view: &GameView,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn announce(&self, _channel: &ChannelId, _view: &GameView) -> Result<(), GatewayError> {
        Ok(())
    }
}
