//! Russian-roulette duel engine.
//!
//! Button-driven, two players. A challenge sits pending for a short
//! accept window; acceptance re-validates both balances before the pot
//! is collected, since either side may have spent coins since the
//! challenge was issued. The duel itself is unbounded: the cylinder
//! reloads after six empty chambers and play continues until someone
//! finds the bullet.

use crate::config::ArenaConfig;
use crate::gateway::{Action, Control, DuelAction, GameView, Gateway, Tone};
use crate::games::types::GameType;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::session::ActivePlayers;
use crate::{ChannelId, Coins, GameError, GameResult, MessageRef, PlayerId};
use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const CHAMBER_COUNT: u8 = 6;

/// Unordered player pair identifying one live duel.
type DuelKey = (PlayerId, PlayerId);

fn duel_key(a: &PlayerId, b: &PlayerId) -> DuelKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

struct Challenge {
    id: Uuid,
    challenger: PlayerId,
    challenged: PlayerId,
    wager: Coins,
    channel: ChannelId,
    message: Option<MessageRef>,
}

/// Mutable state of one live duel.
struct DuelGame {
    player1: PlayerId,
    player2: PlayerId,
    current_turn: PlayerId,
    wager: Coins,
    channel: ChannelId,
    message: Option<MessageRef>,
    round: u32,
    bullet: u8,
    chamber: u8,
    game_over: bool,
}

enum TriggerOutcome {
    /// The shooter found the bullet; the other player takes the pot.
    Hit { winner: PlayerId, chamber: u8 },
    Click { next: PlayerId, chamber: u8, reloaded: bool },
}

impl DuelGame {
    fn other(&self, player: &PlayerId) -> PlayerId {
        if *player == self.player1 {
            self.player2.clone()
        } else {
            self.player1.clone()
        }
    }

    fn pot(&self) -> Coins {
        self.wager * 2
    }

    fn pull_trigger(&mut self, rng: &mut impl Rng) -> TriggerOutcome {
        let fired = self.chamber;
        if fired == self.bullet {
            self.game_over = true;
            return TriggerOutcome::Hit {
                winner: self.other(&self.current_turn),
                chamber: fired,
            };
        }

        self.chamber += 1;
        self.round += 1;
        self.current_turn = self.other(&self.current_turn);
        let mut reloaded = false;
        if self.chamber > CHAMBER_COUNT {
            self.chamber = 1;
            self.bullet = rng.gen_range(1..=CHAMBER_COUNT);
            reloaded = true;
        }
        TriggerOutcome::Click {
            next: self.current_turn.clone(),
            chamber: fired,
            reloaded,
        }
    }
}

/// Read-only view of a live duel for the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuelSnapshot {
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub current_turn: PlayerId,
    pub pot: Coins,
    pub round: u32,
    pub chamber: u8,
    pub game_over: bool,
}

pub struct DuelArena {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    players: Arc<ActivePlayers>,
    min_bet: Coins,
    accept_window: Duration,
    challenges: DashMap<PlayerId, Challenge>,
    games: DashMap<DuelKey, Arc<Mutex<DuelGame>>>,
}

impl DuelArena {
    pub fn new(
        config: &ArenaConfig,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn Gateway>,
        metrics: Arc<MetricsRecorder>,
        players: Arc<ActivePlayers>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            gateway,
            metrics,
            players,
            min_bet: config.bets.duel_min,
            accept_window: config.timing.duel_accept(),
            challenges: DashMap::new(),
            games: DashMap::new(),
        })
    }

    pub fn in_duel(&self, player: &PlayerId) -> bool {
        self.games
            .iter()
            .any(|entry| entry.key().0 == *player || entry.key().1 == *player)
    }

    pub fn snapshot_for(&self, player: &PlayerId) -> Option<DuelSnapshot> {
        self.find_game(player).map(|game| {
            let game = game.lock().expect("duel lock");
            DuelSnapshot {
                player1: game.player1.clone(),
                player2: game.player2.clone(),
                current_turn: game.current_turn.clone(),
                pot: game.pot(),
                round: game.round,
                chamber: game.chamber,
                game_over: game.game_over,
            }
        })
    }

    /// Issue a challenge. It expires on its own after the accept window.
    pub async fn challenge(
        self: Arc<Self>,
        challenger: PlayerId,
        challenged: PlayerId,
        wager: Coins,
        channel: ChannelId,
    ) -> GameResult<()> {
        if challenger == challenged {
            return Err(GameError::SelfTarget);
        }
        if wager < self.min_bet {
            return Err(GameError::BetBelowMinimum { min: self.min_bet });
        }
        if self.ledger.balance(&challenger).await? < wager {
            return Err(GameError::InsufficientFunds);
        }
        if self.challenges.contains_key(&challenged) {
            return Err(GameError::PendingRequest);
        }
        if self.in_duel(&challenger) || self.in_duel(&challenged) {
            return Err(GameError::AlreadyActive);
        }

        let id = Uuid::new_v4();
        self.challenges.insert(
            challenged.clone(),
            Challenge {
                id,
                challenger: challenger.clone(),
                challenged: challenged.clone(),
                wager,
                channel: channel.clone(),
                message: None,
            },
        );

        let view = GameView::new(
            "Russian Roulette challenge",
            format!(
                "{challenger} challenged {challenged}!\nBet: {wager} each, winner takes all.\n{} seconds to accept.",
                self.accept_window.as_secs()
            ),
            Tone::Danger,
        )
        .with_controls(vec![
            Control::new("Accept", Action::Duel(DuelAction::Accept)),
            Control::new("Decline", Action::Duel(DuelAction::Decline)),
        ]);

        match self.gateway.render_initial(&channel, &challenged, &view).await {
            Ok(message) => {
                if let Some(mut pending) = self.challenges.get_mut(&challenged) {
                    pending.message = Some(message);
                }
            }
            Err(e) => {
                self.challenges.remove(&challenged);
                return Err(e.into());
            }
        }

        let arena = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::time::sleep(arena.accept_window).await;
            arena.expire_challenge(&challenged, id).await;
        });

        Ok(())
    }

    async fn expire_challenge(&self, challenged: &PlayerId, id: Uuid) {
        let Some((_, challenge)) = self
            .challenges
            .remove_if(challenged, |_, pending| pending.id == id)
        else {
            return;
        };
        tracing::info!(challenger = %challenge.challenger, %challenged, "duel challenge expired");
        let view = GameView::new(
            "Challenge expired",
            format!(
                "{challenged} did not respond to {}'s challenge in time.",
                challenge.challenger
            ),
            Tone::Info,
        );
        match &challenge.message {
            Some(message) => {
                let _ = self.gateway.render_terminal(message, &view).await;
            }
            None => {
                let _ = self.gateway.announce(&challenge.channel, &view).await;
            }
        }
    }

    pub async fn handle(self: Arc<Self>, player: PlayerId, action: DuelAction) -> GameResult<()> {
        match action {
            DuelAction::Accept => self.accept(player).await,
            DuelAction::Decline => self.decline(player).await,
            DuelAction::Shoot => self.shoot(player).await,
        }
    }

    /// Accept a pending challenge: both balances re-validated, both
    /// wagers collected into the pot, the duel begins.
    async fn accept(&self, player: PlayerId) -> GameResult<()> {
        let Some((_, challenge)) = self.challenges.remove(&player) else {
            return Err(GameError::NotFound);
        };
        let Challenge {
            challenger,
            challenged,
            wager,
            channel,
            message,
            ..
        } = challenge;

        // Funds may have moved since the challenge went out.
        if let Err(e) = self.ledger.withdraw(&challenger, wager).await {
            tracing::info!(%challenger, error = %e, "duel challenger can no longer cover the bet");
            let view = GameView::new(
                "Challenge cancelled",
                format!("{challenger} no longer has enough balance."),
                Tone::Danger,
            );
            self.finish_message(&message, &channel, &view).await;
            return Err(GameError::InsufficientFunds);
        }
        if let Err(e) = self.ledger.withdraw(&challenged, wager).await {
            tracing::info!(%challenged, error = %e, "duel acceptor cannot cover the bet");
            let _ = self.ledger.deposit(&challenger, wager).await;
            let view = GameView::new(
                "Challenge cancelled",
                format!("{challenged} does not have enough balance."),
                Tone::Danger,
            );
            self.finish_message(&message, &channel, &view).await;
            return Err(GameError::InsufficientFunds);
        }

        self.metrics.record_wager(GameType::Duel, wager * 2);

        let (first, bullet) = {
            let mut rng = rand::thread_rng();
            let first = if rng.gen_bool(0.5) {
                challenger.clone()
            } else {
                challenged.clone()
            };
            (first, rng.gen_range(1..=CHAMBER_COUNT))
        };
        let game = DuelGame {
            player1: challenger.clone(),
            player2: challenged.clone(),
            current_turn: first,
            wager,
            channel: channel.clone(),
            message: message.clone(),
            round: 1,
            bullet,
            chamber: 1,
            game_over: false,
        };

        let view = Self::turn_view(&game);
        let key = duel_key(&challenger, &challenged);
        self.games.insert(key, Arc::new(Mutex::new(game)));
        self.players.mark(&challenger);
        self.players.mark(&challenged);
        tracing::info!(%challenger, %challenged, wager, "duel started");

        match &message {
            Some(handle) => {
                let _ = self.gateway.render_update(handle, &view).await;
            }
            None => {
                let _ = self.gateway.render_initial(&channel, &challenged, &view).await;
            }
        }
        Ok(())
    }

    async fn decline(&self, player: PlayerId) -> GameResult<()> {
        let Some((_, challenge)) = self.challenges.remove(&player) else {
            return Err(GameError::NotFound);
        };
        let view = GameView::new(
            "Challenge declined",
            format!("{player} declined the challenge."),
            Tone::Info,
        );
        self.finish_message(&challenge.message, &challenge.channel, &view)
            .await;
        Ok(())
    }

    async fn shoot(&self, player: PlayerId) -> GameResult<()> {
        let Some(game) = self.find_game(&player) else {
            return Err(GameError::NotFound);
        };

        // Transition under the lock, settle after releasing it.
        let (outcome, pot, channel, message, view) = {
            let mut game = game.lock().expect("duel lock");
            if game.game_over {
                return Ok(());
            }
            if game.current_turn != player {
                return Err(GameError::NotYourTurn);
            }
            let outcome = game.pull_trigger(&mut rand::thread_rng());
            let view = match &outcome {
                TriggerOutcome::Hit { winner, chamber } => GameView::new(
                    "Russian Roulette - GAME OVER",
                    format!(
                        "POW! {player} pulled the trigger on chamber {chamber} and died.\nWinner: {winner} takes {}.",
                        game.pot()
                    ),
                    Tone::Danger,
                ),
                TriggerOutcome::Click { .. } => Self::turn_view(&game),
            };
            (
                outcome,
                game.pot(),
                game.channel.clone(),
                game.message.clone(),
                view,
            )
        };

        match outcome {
            TriggerOutcome::Hit { winner, .. } => {
                let loser = player;
                self.games.remove(&duel_key(&winner, &loser));
                self.players.unmark(&winner);
                self.players.unmark(&loser);

                if let Err(e) = self.ledger.deposit(&winner, pot).await {
                    tracing::error!(%winner, pot, error = %e, "duel pot payout failed");
                }
                self.metrics.record_payout(pot);
                tracing::info!(%winner, %loser, pot, "duel settled");
                self.finish_message(&message, &channel, &view).await;
            }
            TriggerOutcome::Click {
                next,
                chamber,
                reloaded,
            } => {
                tracing::debug!(%player, chamber, reloaded, next = %next, "duel chamber empty");
                match &message {
                    Some(handle) => {
                        let _ = self.gateway.render_update(handle, &view).await;
                    }
                    None => {
                        let _ = self.gateway.announce(&channel, &view).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn find_game(&self, player: &PlayerId) -> Option<Arc<Mutex<DuelGame>>> {
        self.games
            .iter()
            .find(|entry| entry.key().0 == *player || entry.key().1 == *player)
            .map(|entry| Arc::clone(entry.value()))
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

    fn turn_view(game: &DuelGame) -> GameView {
        GameView::new(
            "Russian Roulette",
            format!(
                "It's {}'s turn. Pull the trigger...\nPot: {} | Round: {} | Cylinder: {}/{CHAMBER_COUNT}",
                game.current_turn,
                game.pot(),
                game.round,
                game.chamber,
            ),
            Tone::Danger,
        )
        .with_controls(vec![Control::new("SHOOT", Action::Duel(DuelAction::Shoot))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NoopGateway;
    use crate::ledger::MemoryLedger;

    fn game_fixture(bullet: u8) -> DuelGame {
        DuelGame {
            player1: "alice".to_string(),
            player2: "bob".to_string(),
            current_turn: "alice".to_string(),
            wager: 100,
            channel: "arena".to_string(),
            message: None,
            round: 1,
            bullet,
            chamber: 1,
            game_over: false,
        }
    }

    #[test]
    fn bullet_in_first_chamber_kills_first_shooter() {
        let mut game = game_fixture(1);
        let mut rng = rand::thread_rng();
        match game.pull_trigger(&mut rng) {
            TriggerOutcome::Hit { winner, chamber } => {
                assert_eq!(winner, "bob");
                assert_eq!(chamber, 1);
            }
            TriggerOutcome::Click { .. } => panic!("expected a hit"),
        }
        assert!(game.game_over);
    }

    #[test]
    fn survival_advances_chamber_and_swaps_turn() {
        let mut game = game_fixture(6);
        let mut rng = rand::thread_rng();
        match game.pull_trigger(&mut rng) {
            TriggerOutcome::Click {
                next,
                chamber,
                reloaded,
            } => {
                assert_eq!(next, "bob");
                assert_eq!(chamber, 1);
                assert!(!reloaded);
            }
            TriggerOutcome::Hit { .. } => panic!("expected a click"),
        }
        assert_eq!(game.chamber, 2);
        assert_eq!(game.round, 2);
        assert_eq!(game.current_turn, "bob");
    }

    #[test]
    fn cylinder_reloads_after_six_chambers() {
        let mut game = game_fixture(3);
        game.chamber = 6;
        let mut rng = rand::thread_rng();
        match game.pull_trigger(&mut rng) {
            TriggerOutcome::Click { reloaded, .. } => assert!(reloaded),
            TriggerOutcome::Hit { .. } => panic!("bullet was at 3"),
        }
        assert_eq!(game.chamber, 1);
        assert!((1..=CHAMBER_COUNT).contains(&game.bullet));
    }

    struct Fixture {
        arena: Arc<DuelArena>,
        ledger: Arc<MemoryLedger>,
        players: Arc<ActivePlayers>,
    }

    fn fixture() -> Fixture {
        let config = ArenaConfig::default();
        let ledger = Arc::new(MemoryLedger::new());
        let players = ActivePlayers::new();
        let arena = DuelArena::new(
            &config,
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::new(NoopGateway::new()),
            Arc::new(MetricsRecorder::new()),
            Arc::clone(&players),
        );
        Fixture {
            arena,
            ledger,
            players,
        }
    }

    #[tokio::test]
    async fn challenge_validations() {
        let f = fixture();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        f.ledger.set_balance(&alice, 1_000);
        f.ledger.set_balance(&bob, 1_000);

        assert!(matches!(
            f.arena
                .clone()
                .challenge(alice.clone(), alice.clone(), 100, "arena".to_string())
                .await,
            Err(GameError::SelfTarget)
        ));
        assert!(matches!(
            f.arena
                .clone()
                .challenge(alice.clone(), bob.clone(), 10, "arena".to_string())
                .await,
            Err(GameError::BetBelowMinimum { .. })
        ));

        f.arena
            .clone()
            .challenge(alice.clone(), bob.clone(), 100, "arena".to_string())
            .await
            .unwrap();
        // Second challenge against the same target is rejected.
        assert!(matches!(
            f.arena
                .clone()
                .challenge(alice.clone(), bob.clone(), 100, "arena".to_string())
                .await,
            Err(GameError::PendingRequest)
        ));
        // The challenge itself moves no funds.
        assert_eq!(f.ledger.balance(&alice).await.unwrap(), 1_000);
        assert_eq!(f.ledger.balance(&bob).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn accept_collects_both_wagers_and_duel_pays_winner_once() {
        let f = fixture();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        f.ledger.set_balance(&alice, 1_000);
        f.ledger.set_balance(&bob, 1_000);

        f.arena
            .clone()
            .challenge(alice.clone(), bob.clone(), 100, "arena".to_string())
            .await
            .unwrap();
        f.arena
            .clone()
            .handle(bob.clone(), DuelAction::Accept)
            .await
            .unwrap();

        assert_eq!(f.ledger.balance(&alice).await.unwrap(), 900);
        assert_eq!(f.ledger.balance(&bob).await.unwrap(), 900);
        assert!(f.players.is_active(&alice));
        assert!(f.players.is_active(&bob));

        // Shoot in turn order until the duel resolves.
        loop {
            let Some(snapshot) = f.arena.snapshot_for(&alice) else {
                break;
            };
            f.arena
                .clone()
                .handle(snapshot.current_turn.clone(), DuelAction::Shoot)
                .await
                .unwrap();
        }

        let alice_after = f.ledger.balance(&alice).await.unwrap();
        let bob_after = f.ledger.balance(&bob).await.unwrap();
        // Winner nets +100, loser nets -100, pot paid exactly once.
        assert_eq!(alice_after + bob_after, 2_000);
        assert!(
            (alice_after == 1_100 && bob_after == 900)
                || (alice_after == 900 && bob_after == 1_100)
        );
        assert!(!f.players.is_active(&alice));
        assert!(!f.players.is_active(&bob));
        assert!(!f.arena.in_duel(&alice));
    }

    #[tokio::test]
    async fn accept_rolls_back_when_challenger_funds_vanished() {
        let f = fixture();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        f.ledger.set_balance(&alice, 1_000);
        f.ledger.set_balance(&bob, 1_000);

        f.arena
            .clone()
            .challenge(alice.clone(), bob.clone(), 500, "arena".to_string())
            .await
            .unwrap();
        // Challenger spends their stack while the challenge is pending.
        f.ledger.set_balance(&alice, 100);

        let err = f
            .arena
            .clone()
            .handle(bob.clone(), DuelAction::Accept)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InsufficientFunds));
        assert_eq!(f.ledger.balance(&alice).await.unwrap(), 100);
        assert_eq!(f.ledger.balance(&bob).await.unwrap(), 1_000);
        assert!(!f.arena.in_duel(&alice));
    }

    #[tokio::test]
    async fn shooting_out_of_turn_rejected() {
        let f = fixture();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        f.ledger.set_balance(&alice, 1_000);
        f.ledger.set_balance(&bob, 1_000);

        f.arena
            .clone()
            .challenge(alice.clone(), bob.clone(), 100, "arena".to_string())
            .await
            .unwrap();
        f.arena
            .clone()
            .handle(bob.clone(), DuelAction::Accept)
            .await
            .unwrap();

        let snapshot = f.arena.snapshot_for(&alice).expect("duel running");
        let idle = if snapshot.current_turn == alice {
            bob.clone()
        } else {
            alice.clone()
        };
        assert!(matches!(
            f.arena.clone().handle(idle, DuelAction::Shoot).await,
            Err(GameError::NotYourTurn)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_challenge_expires() {
        let f = fixture();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        f.ledger.set_balance(&alice, 1_000);

        f.arena
            .clone()
            .challenge(alice.clone(), bob.clone(), 100, "arena".to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(matches!(
            f.arena.clone().handle(bob.clone(), DuelAction::Accept).await,
            Err(GameError::NotFound)
        ));
    }
}
