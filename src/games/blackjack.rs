//! Blackjack engine.
//!
//! Queue-routed, full rule set: hit, stand, double-down and insurance.
//! Naturals are checked straight off the deal; a double-down re-validates
//! the balance at doubling time, not at game start.

use crate::config::ArenaConfig;
use crate::gateway::{Action, BlackjackAction, Control, GameView, Gateway, Tone};
use crate::games::types::{GameType, Outcome};
use crate::games::wait_for;
use crate::ledger::Ledger;
use crate::metrics::MetricsRecorder;
use crate::queue::{GameJob, TurnQueue};
use crate::session::SessionStore;
use crate::{ChannelId, Coins, GameError, GameResult, PlayerId};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Dealer stands at this score and above.
const DEALER_STAND: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suit {
    Spades,
    Hearts,
    Diamonds,
    Clubs,
}

impl Suit {
    fn symbol(self) -> &'static str {
        match self {
            Suit::Spades => "\u{2660}",
            Suit::Hearts => "\u{2665}",
            Suit::Diamonds => "\u{2666}",
            Suit::Clubs => "\u{2663}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Rank {
    const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];

    /// Base value before soft-ace adjustment (ace counts as 11).
    fn value(self) -> u32 {
        match self {
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten | Rank::Jack | Rank::Queen | Rank::King => 10,
            Rank::Ace => 11,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl std::fmt::Display for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.rank.symbol(), self.suit.symbol())
    }
}

/// A full 52-card deck, unshuffled.
pub fn standard_deck() -> Vec<Card> {
    let suits = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];
    let mut deck = Vec::with_capacity(52);
    for suit in suits {
        for rank in Rank::ALL {
            deck.push(Card { rank, suit });
        }
    }
    deck
}

/// Hand value with soft-ace adjustment: aces count 11, then downgrade to
/// 1 while the total busts. Deterministic for a given card sequence.
pub fn score(hand: &[Card]) -> u32 {
    let mut value: u32 = hand.iter().map(|c| c.rank.value()).sum();
    let mut aces = hand.iter().filter(|c| c.rank == Rank::Ace).count();
    while value > 21 && aces > 0 {
        value -= 10;
        aces -= 1;
    }
    value
}

/// A two-card 21.
pub fn is_blackjack(hand: &[Card]) -> bool {
    hand.len() == 2 && score(hand) == 21
}

fn render_hand(hand: &[Card]) -> String {
    hand.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Main-hand and insurance settlement for one finished round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackjackSettlement {
    pub outcome: Outcome,
    /// Total credit for the main hand (stake included on win/push).
    pub payout: Coins,
    /// Total credit for the insurance side bet, zero when lost or absent.
    pub insurance_payout: Coins,
}

/// Pure state of one blackjack round.
pub struct BlackjackRound {
    deck: Vec<Card>,
    player: Vec<Card>,
    dealer: Vec<Card>,
    wager: Coins,
    doubled: bool,
    insurance: Option<Coins>,
    hits: u32,
}

impl BlackjackRound {
    /// Shuffle a fresh deck and deal two cards each.
    pub fn deal(wager: Coins, rng: &mut impl Rng) -> Self {
        let mut deck = standard_deck();
        deck.shuffle(rng);
        let player = vec![
            deck.pop().expect("full deck"),
            deck.pop().expect("full deck"),
        ];
        let dealer = vec![
            deck.pop().expect("full deck"),
            deck.pop().expect("full deck"),
        ];
        Self {
            deck,
            player,
            dealer,
            wager,
            doubled: false,
            insurance: None,
            hits: 0,
        }
    }

    #[cfg(test)]
    fn with_hands(player: Vec<Card>, dealer: Vec<Card>, deck: Vec<Card>, wager: Coins) -> Self {
        Self {
            deck,
            player,
            dealer,
            wager,
            doubled: false,
            insurance: None,
            hits: 0,
        }
    }

    fn draw(&mut self) -> Card {
        // One player and a dealer cannot exhaust 52 cards.
        self.deck.pop().expect("deck exhausted mid-round")
    }

    pub fn player_hand(&self) -> &[Card] {
        &self.player
    }

    pub fn dealer_hand(&self) -> &[Card] {
        &self.dealer
    }

    pub fn player_score(&self) -> u32 {
        score(&self.player)
    }

    pub fn dealer_score(&self) -> u32 {
        score(&self.dealer)
    }

    pub fn player_blackjack(&self) -> bool {
        is_blackjack(&self.player)
    }

    pub fn dealer_blackjack(&self) -> bool {
        is_blackjack(&self.dealer)
    }

    pub fn dealer_upcard_is_ace(&self) -> bool {
        self.dealer.first().map(|c| c.rank == Rank::Ace) == Some(true)
    }

    /// Double-down requires exactly the two dealt cards and no prior
    /// double.
    pub fn can_double(&self) -> bool {
        self.player.len() == 2 && !self.doubled
    }

    /// Insurance requires an ace up-card, no hit taken, and no insurance
    /// already bought.
    pub fn can_insure(&self) -> bool {
        self.dealer_upcard_is_ace() && self.hits == 0 && self.insurance.is_none()
    }

    pub fn insurance_stake(&self) -> Coins {
        self.wager / 2
    }

    pub fn hit(&mut self) -> u32 {
        let card = self.draw();
        self.player.push(card);
        self.hits += 1;
        self.player_score()
    }

    /// Double the wager and draw exactly one card. The caller settles
    /// the extra debit against the ledger first.
    pub fn take_double(&mut self) {
        self.doubled = true;
        let card = self.draw();
        self.player.push(card);
    }

    pub fn take_insurance(&mut self, stake: Coins) {
        self.insurance = Some(stake);
    }

    /// Total debited from the player over the round.
    pub fn total_staked(&self) -> Coins {
        let main = if self.doubled {
            self.wager * 2
        } else {
            self.wager
        };
        main + self.insurance.unwrap_or(0)
    }

    /// Dealer hits below 17, stands at 17 and above.
    pub fn dealer_play(&mut self) {
        while self.dealer_score() < DEALER_STAND {
            let card = self.draw();
            self.dealer.push(card);
        }
    }

    /// Settle the round against the settlement matrix. Insurance resolves
    /// independently of the main hand.
    pub fn settle(&self) -> BlackjackSettlement {
        let effective = if self.doubled {
            self.wager * 2
        } else {
            self.wager
        };
        let player = self.player_score();
        let dealer = self.dealer_score();

        let (outcome, payout) = if self.player_blackjack() {
            if self.dealer_blackjack() {
                (Outcome::Push, self.wager)
            } else {
                // 3:2 on the original wager; naturals cannot be doubled.
                (Outcome::Win, self.wager * 5 / 2)
            }
        } else if player > 21 {
            (Outcome::Loss, 0)
        } else if self.dealer_blackjack() {
            (Outcome::Loss, 0)
        } else if dealer > 21 || player > dealer {
            (Outcome::Win, effective * 2)
        } else if player < dealer {
            (Outcome::Loss, 0)
        } else {
            (Outcome::Push, effective)
        };

        let insurance_payout = match self.insurance {
            Some(stake) if self.dealer_blackjack() => stake * 3,
            _ => 0,
        };

        BlackjackSettlement {
            outcome,
            payout,
            insurance_payout,
        }
    }
}

pub struct BlackjackEngine {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<MetricsRecorder>,
    sessions: SessionStore,
    min_bet: Coins,
    idle_timeout: Duration,
}

impl BlackjackEngine {
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
            sessions: SessionStore::new("blackjack"),
            min_bet: config.bets.blackjack_min,
            idle_timeout: config.timing.blackjack_idle(),
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn start(
        self: Arc<Self>,
        queue: &TurnQueue,
        player: PlayerId,
        wager: Coins,
        channel: ChannelId,
    ) -> GameResult<()> {
        if wager < self.min_bet {
            return Err(GameError::BetBelowMinimum { min: self.min_bet });
        }
        if self.sessions.contains(&player) {
            return Err(GameError::AlreadyActive);
        }
        if self.ledger.balance(&player).await? < wager {
            return Err(GameError::InsufficientFunds);
        }

        let engine = Arc::clone(&self);
        let gateway = Arc::clone(&self.gateway);
        let queued_channel = channel.clone();
        let queued_player = player.clone();

        let job = GameJob::new(player.clone(), move |guard| async move {
            engine.run_round(player, wager, channel).await;
            drop(guard);
        })
        .notify_queued(move |position| {
            tokio::spawn(async move {
                let view = GameView::new(
                    "Queued",
                    format!("{queued_player} queued for blackjack (position #{position})."),
                    Tone::Info,
                );
                let _ = gateway.announce(&queued_channel, &view).await;
            });
        });

        queue.enqueue(job)
    }

    async fn run_round(&self, player: PlayerId, wager: Coins, channel: ChannelId) {
        if let Err(e) = self.ledger.withdraw(&player, wager).await {
            tracing::info!(%player, error = %e, "blackjack wager refused after queue wait");
            let view = GameView::new(
                "Blackjack",
                format!("{player} ran out of funds while waiting in the queue."),
                Tone::Danger,
            );
            let _ = self.gateway.announce(&channel, &view).await;
            return;
        }

        let mut rx = match self.sessions.open(&player, wager, &channel) {
            Ok(rx) => rx,
            Err(_) => {
                let _ = self.ledger.deposit(&player, wager).await;
                return;
            }
        };
        self.metrics.record_wager(GameType::Blackjack, wager);

        let mut round = BlackjackRound::deal(wager, &mut rand::thread_rng());

        // Naturals bypass the turn loop. A dealer natural behind an ace
        // up-card stays hidden so insurance remains offerable; any other
        // natural resolves here.
        if round.player_blackjack() || (round.dealer_blackjack() && !round.dealer_upcard_is_ace())
        {
            let settlement = round.settle();
            let view = Self::final_view(&round, &settlement, wager);
            match self.gateway.render_initial(&channel, &player, &view).await {
                Ok(_) => {
                    self.credit(&player, &settlement).await;
                }
                Err(e) => {
                    tracing::warn!(%player, error = %e, "blackjack initial render failed, refunding");
                    let _ = self.ledger.deposit(&player, wager).await;
                }
            }
            self.sessions.close(&player);
            return;
        }

        let view = Self::turn_view(&round, wager);
        let message = match self.gateway.render_initial(&channel, &player, &view).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%player, error = %e, "blackjack initial render failed, refunding");
                let _ = self.ledger.deposit(&player, wager).await;
                self.sessions.close(&player);
                return;
            }
        };

        loop {
            let action = wait_for(&mut rx, self.idle_timeout, |action| match action {
                Action::Blackjack(a) => Some(a),
                _ => None,
            })
            .await;

            match action {
                None => {
                    // Idle timeout forfeits the wager; the dealer never
                    // plays and insurance is forfeited with it.
                    tracing::info!(%player, staked = round.total_staked(), "blackjack idle timeout");
                    let view = GameView::new(
                        "Blackjack - timed out",
                        format!("No action in time. {player} forfeited {}.", round.total_staked()),
                        Tone::Danger,
                    );
                    let _ = self.gateway.render_terminal(&message, &view).await;
                    break;
                }
                Some(BlackjackAction::Hit) => {
                    let new_score = round.hit();
                    if new_score > 21 {
                        let settlement = round.settle();
                        self.credit(&player, &settlement).await;
                        let view = Self::final_view(&round, &settlement, wager);
                        let _ = self.gateway.render_terminal(&message, &view).await;
                        break;
                    }
                    let view = Self::turn_view(&round, wager);
                    let _ = self.gateway.render_update(&message, &view).await;
                }
                Some(BlackjackAction::Stand) => {
                    round.dealer_play();
                    let settlement = round.settle();
                    self.credit(&player, &settlement).await;
                    let view = Self::final_view(&round, &settlement, wager);
                    let _ = self.gateway.render_terminal(&message, &view).await;
                    break;
                }
                Some(BlackjackAction::DoubleDown) => {
                    if !round.can_double() {
                        continue;
                    }
                    // Second debit validated now, not at game start.
                    if self.ledger.withdraw(&player, wager).await.is_err() {
                        let mut view = Self::turn_view(&round, wager);
                        view.body.push_str("\nNot enough funds to double down.");
                        let _ = self.gateway.render_update(&message, &view).await;
                        continue;
                    }
                    self.metrics.record_additional_wager(wager);
                    round.take_double();
                    if round.player_score() <= 21 {
                        round.dealer_play();
                    }
                    let settlement = round.settle();
                    self.credit(&player, &settlement).await;
                    let view = Self::final_view(&round, &settlement, wager);
                    let _ = self.gateway.render_terminal(&message, &view).await;
                    break;
                }
                Some(BlackjackAction::Insurance) => {
                    if !round.can_insure() {
                        continue;
                    }
                    let stake = round.insurance_stake();
                    if self.ledger.withdraw(&player, stake).await.is_err() {
                        let mut view = Self::turn_view(&round, wager);
                        view.body.push_str("\nNot enough funds for insurance.");
                        let _ = self.gateway.render_update(&message, &view).await;
                        continue;
                    }
                    self.metrics.record_additional_wager(stake);
                    round.take_insurance(stake);
                    if round.dealer_blackjack() {
                        // Peek: the hole card completes a natural, the
                        // hand ends and insurance pays 2:1.
                        let settlement = round.settle();
                        self.credit(&player, &settlement).await;
                        let view = Self::final_view(&round, &settlement, wager);
                        let _ = self.gateway.render_terminal(&message, &view).await;
                        break;
                    }
                    let view = Self::turn_view(&round, wager);
                    let _ = self.gateway.render_update(&message, &view).await;
                }
            }
        }

        self.sessions.close(&player);
    }

    async fn credit(&self, player: &PlayerId, settlement: &BlackjackSettlement) {
        let total = settlement.payout + settlement.insurance_payout;
        if total > 0 {
            if let Err(e) = self.ledger.deposit(player, total).await {
                tracing::error!(%player, total, error = %e, "blackjack payout failed");
            }
            self.metrics.record_payout(total);
        }
    }

    fn turn_view(round: &BlackjackRound, wager: Coins) -> GameView {
        let dealer_up = round
            .dealer_hand()
            .first()
            .map(|c| c.to_string())
            .unwrap_or_default();
        let body = format!(
            "Bet: {wager}\nYour hand: {} ({})\nDealer shows: {dealer_up} ?",
            render_hand(round.player_hand()),
            round.player_score(),
        );

        let mut controls = vec![
            Control::new("Hit", Action::Blackjack(BlackjackAction::Hit)),
            Control::new("Stand", Action::Blackjack(BlackjackAction::Stand)),
        ];
        if round.can_double() {
            controls.push(Control::new(
                "Double Down",
                Action::Blackjack(BlackjackAction::DoubleDown),
            ));
        }
        if round.can_insure() {
            controls.push(Control::new(
                "Insurance",
                Action::Blackjack(BlackjackAction::Insurance),
            ));
        }

        GameView::new("Blackjack", body, Tone::Highlight).with_controls(controls)
    }

    fn final_view(round: &BlackjackRound, settlement: &BlackjackSettlement, wager: Coins) -> GameView {
        let (title, tone) = match settlement.outcome {
            Outcome::Win if round.player_blackjack() => ("BLACKJACK!", Tone::Highlight),
            Outcome::Win => ("You win!", Tone::Success),
            Outcome::Push => ("Push", Tone::Info),
            Outcome::Loss if round.player_score() > 21 => ("BUST! You lose", Tone::Danger),
            Outcome::Loss => ("You lose", Tone::Danger),
        };

        let total = settlement.payout + settlement.insurance_payout;
        let net = total - round.total_staked();
        let mut body = format!(
            "Your hand: {} ({})\nDealer hand: {} ({})\nBet: {wager} | Returned: {total} | Net: {net:+}",
            render_hand(round.player_hand()),
            round.player_score(),
            render_hand(round.dealer_hand()),
            round.dealer_score(),
        );
        if settlement.insurance_payout > 0 {
            body.push_str(&format!(
                "\nInsurance paid {}.",
                settlement.insurance_payout
            ));
        }

        GameView::new(title, body, tone)
    }
}
