//! Test fixtures and payload helpers.
//!
//! Provides builders for event and wallet roots and helpers that encode
//! deltas the way a content server would put them on the wire.

use bytes::Bytes;
use livesync_protocol::{
    Delta, Event, Market, Odds, Outcome, PushEvent, RootEntity, Score, SessionCredential,
    TopicDescriptor, Wallet,
};
use std::sync::Arc;

/// Creates odds, panicking on a zero denominator.
pub fn odds(numerator: u32, denominator: u32) -> Odds {
    Odds::new(numerator, denominator).expect("fixture odds must have a non-zero denominator")
}

/// Builder for a market fixture.
#[derive(Debug, Clone)]
pub struct MarketBuilder {
    market: Market,
}

impl MarketBuilder {
    /// Starts a tradable market with no outcomes.
    pub fn new(id: &str) -> Self {
        Self {
            market: Market {
                id: id.into(),
                name: format!("Market {id}"),
                tradable: true,
                outcomes: Vec::new(),
            },
        }
    }

    /// Sets the display name.
    pub fn name(mut self, name: &str) -> Self {
        self.market.name = name.to_string();
        self
    }

    /// Marks the market as suspended.
    pub fn suspended(mut self) -> Self {
        self.market.tradable = false;
        self
    }

    /// Appends a tradable outcome priced `numerator/denominator`.
    pub fn outcome(mut self, id: &str, numerator: u32, denominator: u32) -> Self {
        let outcome = outcome(id, self.market.id.as_str(), numerator, denominator);
        self.market.outcomes.push(Arc::new(outcome));
        self
    }

    /// Finishes the market.
    pub fn build(self) -> Market {
        self.market
    }
}

/// Creates a tradable outcome.
pub fn outcome(id: &str, market_id: &str, numerator: u32, denominator: u32) -> Outcome {
    Outcome {
        id: id.into(),
        market_id: market_id.into(),
        name: format!("Outcome {id}"),
        odds: odds(numerator, denominator),
        tradable: true,
    }
}

/// Builder for an event root.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Starts an event with no markets.
    pub fn new(id: &str) -> Self {
        Self {
            event: Event {
                id: id.into(),
                home_team: "Home".into(),
                away_team: "Away".into(),
                status: None,
                match_time: None,
                score: None,
                market_count: 0,
                markets: Vec::new(),
            },
        }
    }

    /// Sets both participants.
    pub fn teams(mut self, home: &str, away: &str) -> Self {
        self.event.home_team = home.to_string();
        self.event.away_team = away.to_string();
        self
    }

    /// Sets the live state.
    pub fn live(mut self, status: &str, match_time: &str, home: u32, away: u32) -> Self {
        self.event.status = Some(status.to_string());
        self.event.match_time = Some(match_time.to_string());
        self.event.score = Some(Score { home, away });
        self
    }

    /// Appends a market and bumps the market count.
    pub fn market(mut self, market: MarketBuilder) -> Self {
        self.event.markets.push(Arc::new(market.build()));
        self.event.market_count += 1;
        self
    }

    /// Finishes the event as a topic root.
    pub fn build(self) -> RootEntity {
        RootEntity::from(self.event)
    }
}

/// Event `E1` with market `M1` holding outcome `O1` at 3/2.
pub fn sample_event() -> RootEntity {
    EventBuilder::new("E1")
        .teams("Lions", "Tigers")
        .market(MarketBuilder::new("M1").outcome("O1", 3, 2))
        .build()
}

/// Event `E1` with two three-way markets.
///
/// `M1` holds `O1..O3`, `M2` holds `O4..O6`.
pub fn match_event() -> RootEntity {
    EventBuilder::new("E1")
        .teams("Lions", "Tigers")
        .live("1H", "12'", 0, 0)
        .market(
            MarketBuilder::new("M1")
                .name("Match Result")
                .outcome("O1", 3, 2)
                .outcome("O2", 11, 4)
                .outcome("O3", 9, 5),
        )
        .market(
            MarketBuilder::new("M2")
                .name("Total Goals")
                .outcome("O4", 5, 6)
                .outcome("O5", 1, 1)
                .outcome("O6", 6, 5),
        )
        .build()
}

/// Wallet `W1` holding 100.00 EUR, all withdrawable.
pub fn sample_wallet() -> RootEntity {
    RootEntity::from(Wallet {
        id: "W1".into(),
        currency: "EUR".into(),
        total: 10_000,
        withdrawable: 10_000,
        bonus: 0,
    })
}

/// Topic of the sample event.
pub fn event_topic() -> TopicDescriptor {
    TopicDescriptor::event_details("E1")
}

/// Topic of the sample wallet.
pub fn wallet_topic() -> TopicDescriptor {
    TopicDescriptor::wallet("user-1")
}

/// A session credential for tests.
pub fn credential() -> SessionCredential {
    SessionCredential::new("test-session")
}

/// Encodes a delta as a JSON payload.
pub fn json_payload(delta: &Delta) -> Bytes {
    Bytes::from(serde_json::to_vec(delta).expect("delta serializes to JSON"))
}

/// Encodes a delta as a CBOR payload.
pub fn cbor_payload(delta: &Delta) -> Bytes {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(delta, &mut buf).expect("delta serializes to CBOR");
    Bytes::from(buf)
}

/// Wraps a delta as a JSON push message.
pub fn push_message(delta: &Delta) -> PushEvent {
    PushEvent::Message(json_payload(delta))
}

/// A push message that no decoder accepts.
pub fn garbage_message() -> PushEvent {
    PushEvent::Message(Bytes::from_static(b"\x00not a delta"))
}
