//! Topic descriptors and session credentials.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of content a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// One user's wallet.
    Wallet,
    /// Full details of one event.
    EventDetails,
    /// Main market of one event.
    EventMainMarket,
    /// Secondary markets of one event.
    EventSecondaryMarkets,
    /// A single market.
    MarketDetails,
    /// Live score and clock of one event.
    EventLiveData,
}

impl ContentKind {
    /// Returns the stable route prefix for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Wallet => "wallet",
            ContentKind::EventDetails => "event_details",
            ContentKind::EventMainMarket => "event_main_market",
            ContentKind::EventSecondaryMarkets => "event_secondary_markets",
            ContentKind::MarketDetails => "market_details",
            ContentKind::EventLiveData => "event_live_data",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names one logical live stream, e.g. "wallet of user X".
///
/// Descriptors are immutable and compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicDescriptor {
    kind: ContentKind,
    route: String,
}

impl TopicDescriptor {
    /// Creates a descriptor from a kind and a route key.
    pub fn new(kind: ContentKind, route: impl Into<String>) -> Self {
        Self {
            kind,
            route: route.into(),
        }
    }

    /// Wallet topic for a user.
    pub fn wallet(user_id: impl Into<String>) -> Self {
        Self::new(ContentKind::Wallet, user_id)
    }

    /// Event details topic.
    pub fn event_details(event_id: impl Into<String>) -> Self {
        Self::new(ContentKind::EventDetails, event_id)
    }

    /// Main market topic of an event.
    pub fn event_main_market(event_id: impl Into<String>) -> Self {
        Self::new(ContentKind::EventMainMarket, event_id)
    }

    /// Secondary markets topic of an event.
    pub fn event_secondary_markets(event_id: impl Into<String>) -> Self {
        Self::new(ContentKind::EventSecondaryMarkets, event_id)
    }

    /// Live data topic of an event.
    pub fn event_live_data(event_id: impl Into<String>) -> Self {
        Self::new(ContentKind::EventLiveData, event_id)
    }

    /// Returns the content kind.
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Returns the route key.
    pub fn route(&self) -> &str {
        &self.route
    }
}

impl fmt::Display for TopicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.route)
    }
}

/// Opaque session token attached to every subscription.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(String);

impl SessionCredential {
    /// Wraps a session token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for the transport layer.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(***)")
    }
}
