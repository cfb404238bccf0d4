//! Entities reachable inside a topic snapshot.
//!
//! Entities are immutable values shared through `Arc`. A delta never edits
//! an entity in place; it produces a new value that replaces the old one
//! under the same id.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of an entity within a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fractional odds kept as an exact rational.
///
/// Equality is field-wise: `3/2` and `6/4` are different values, since
/// equality decides whether an update is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawOdds")]
pub struct Odds {
    numerator: u32,
    denominator: u32,
}

#[derive(Deserialize)]
struct RawOdds {
    numerator: u32,
    denominator: u32,
}

impl TryFrom<RawOdds> for Odds {
    type Error = DecodeError;

    fn try_from(raw: RawOdds) -> Result<Self, Self::Error> {
        Odds::new(raw.numerator, raw.denominator)
    }
}

impl Odds {
    /// Creates odds `numerator/denominator`.
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, DecodeError> {
        if denominator == 0 {
            return Err(DecodeError::InvalidOdds {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Numerator.
    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    /// Denominator (never zero).
    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Decimal odds for display (`1 + n/d`).
    pub fn decimal(&self) -> f64 {
        1.0 + f64::from(self.numerator) / f64::from(self.denominator)
    }
}

impl fmt::Display for Odds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// A selectable outcome inside a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Outcome id.
    pub id: EntityId,
    /// Id of the owning market.
    pub market_id: EntityId,
    /// Display name.
    pub name: String,
    /// Current price.
    pub odds: Odds,
    /// Whether bets are currently accepted.
    #[serde(default = "default_true")]
    pub tradable: bool,
}

/// A market with its outcomes in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// Market id.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Whether bets are currently accepted.
    #[serde(default = "default_true")]
    pub tradable: bool,
    /// Outcomes, in presentation order.
    #[serde(default)]
    pub outcomes: Vec<Arc<Outcome>>,
}

/// Current score of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Home side.
    pub home: u32,
    /// Away side.
    pub away: u32,
}

/// Root aggregate of an event topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id.
    pub id: EntityId,
    /// Home participant.
    pub home_team: String,
    /// Away participant.
    pub away_team: String,
    /// Match status as reported by the feed.
    #[serde(default)]
    pub status: Option<String>,
    /// Match clock as reported by the feed.
    #[serde(default)]
    pub match_time: Option<String>,
    /// Live score, if any.
    #[serde(default)]
    pub score: Option<Score>,
    /// Total markets offered for the event.
    #[serde(default)]
    pub market_count: u32,
    /// Markets, in presentation order.
    #[serde(default)]
    pub markets: Vec<Arc<Market>>,
}

/// Root aggregate of a wallet topic. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet id.
    pub id: EntityId,
    /// ISO currency code.
    pub currency: String,
    /// Total balance.
    pub total: i64,
    /// Withdrawable part of the balance.
    #[serde(default)]
    pub withdrawable: i64,
    /// Bonus part of the balance.
    #[serde(default)]
    pub bonus: i64,
}

fn default_true() -> bool {
    true
}

/// The single top-level aggregate of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootEntity {
    /// An event with its markets.
    Event(Arc<Event>),
    /// A user wallet.
    Wallet(Arc<Wallet>),
}

impl RootEntity {
    /// Id of the root.
    pub fn id(&self) -> &EntityId {
        match self {
            RootEntity::Event(event) => &event.id,
            RootEntity::Wallet(wallet) => &wallet.id,
        }
    }

    /// Returns the event if this root is one.
    pub fn as_event(&self) -> Option<&Arc<Event>> {
        match self {
            RootEntity::Event(event) => Some(event),
            RootEntity::Wallet(_) => None,
        }
    }

    /// Returns the wallet if this root is one.
    pub fn as_wallet(&self) -> Option<&Arc<Wallet>> {
        match self {
            RootEntity::Wallet(wallet) => Some(wallet),
            RootEntity::Event(_) => None,
        }
    }
}

impl From<Event> for RootEntity {
    fn from(event: Event) -> Self {
        RootEntity::Event(Arc::new(event))
    }
}

impl From<Wallet> for RootEntity {
    fn from(wallet: Wallet) -> Self {
        RootEntity::Wallet(Arc::new(wallet))
    }
}

impl From<RootEntity> for Entity {
    fn from(root: RootEntity) -> Self {
        match root {
            RootEntity::Event(event) => Entity::Event(event),
            RootEntity::Wallet(wallet) => Entity::Wallet(wallet),
        }
    }
}

/// Kind tag of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Root event.
    Event,
    /// Root wallet.
    Wallet,
    /// Nested market.
    Market,
    /// Nested outcome.
    Outcome,
}

impl EntityKind {
    /// True for the root kinds.
    pub fn is_root(&self) -> bool {
        matches!(self, EntityKind::Event | EntityKind::Wallet)
    }
}

/// Any addressable value inside a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// Root event.
    Event(Arc<Event>),
    /// Root wallet.
    Wallet(Arc<Wallet>),
    /// Nested market.
    Market(Arc<Market>),
    /// Nested outcome.
    Outcome(Arc<Outcome>),
}

impl Entity {
    /// Id of the entity.
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Event(event) => &event.id,
            Entity::Wallet(wallet) => &wallet.id,
            Entity::Market(market) => &market.id,
            Entity::Outcome(outcome) => &outcome.id,
        }
    }

    /// Kind of the entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Event(_) => EntityKind::Event,
            Entity::Wallet(_) => EntityKind::Wallet,
            Entity::Market(_) => EntityKind::Market,
            Entity::Outcome(_) => EntityKind::Outcome,
        }
    }

    /// Returns the market if this entity is one.
    pub fn as_market(&self) -> Option<&Arc<Market>> {
        match self {
            Entity::Market(market) => Some(market),
            _ => None,
        }
    }

    /// Returns the outcome if this entity is one.
    pub fn as_outcome(&self) -> Option<&Arc<Outcome>> {
        match self {
            Entity::Outcome(outcome) => Some(outcome),
            _ => None,
        }
    }
}
