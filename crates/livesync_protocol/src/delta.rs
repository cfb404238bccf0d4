//! Incremental changes pushed by the server.

use crate::entity::{EntityId, Market, Odds, Outcome, RootEntity, Score};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Set of field values carried by an update delta.
///
/// Every field is optional. Fields that do not apply to the target's kind
/// are ignored when the delta is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSet {
    /// New display name (any nested entity).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New price (outcome).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odds: Option<Odds>,
    /// New match status (event).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// New match clock (event).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_time: Option<String>,
    /// New score (event).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    /// New market count (event).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_count: Option<u32>,
    /// New total balance (wallet).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    /// New withdrawable balance (wallet).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawable: Option<i64>,
    /// New bonus balance (wallet).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus: Option<i64>,
}

impl FieldSet {
    /// A field set carrying only a price.
    pub fn odds(odds: Odds) -> Self {
        Self {
            odds: Some(odds),
            ..Default::default()
        }
    }

    /// A field set carrying only a score.
    pub fn score(home: u32, away: u32) -> Self {
        Self {
            score: Some(Score { home, away }),
            ..Default::default()
        }
    }

    /// Adds a match status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Adds a match clock.
    pub fn with_match_time(mut self, match_time: impl Into<String>) -> Self {
        self.match_time = Some(match_time.into());
        self
    }

    /// Adds a market count.
    pub fn with_market_count(mut self, count: u32) -> Self {
        self.market_count = Some(count);
        self
    }

    /// Adds a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a total balance.
    pub fn with_total(mut self, total: i64) -> Self {
        self.total = Some(total);
        self
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == FieldSet::default()
    }
}

/// One incremental change to a topic.
///
/// Deltas are safe to reapply (the second application changes nothing) but
/// must be applied in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    /// Field update on one entity.
    Update {
        /// Target entity.
        id: EntityId,
        /// New field values.
        fields: FieldSet,
    },
    /// Enable or disable a market or an outcome.
    Availability {
        /// Target entity.
        id: EntityId,
        /// New availability.
        available: bool,
    },
    /// Add a market, or replace an existing one in place.
    AddMarket {
        /// The market with its outcomes.
        market: Market,
    },
    /// Add an outcome to a known market, or replace it in place.
    AddOutcome {
        /// The outcome; `market_id` names the parent.
        outcome: Outcome,
    },
    /// Remove a market (with its outcomes) or an outcome.
    Remove {
        /// Target entity.
        id: EntityId,
    },
    /// Full-entity replacement of the root.
    Replace {
        /// The new root.
        root: RootEntity,
    },
    /// The session behind the topic expired. Terminal.
    SessionExpired {
        /// Server-provided reason, if any.
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Delta {
    /// Odds update for an outcome.
    pub fn odds(id: impl Into<EntityId>, odds: Odds) -> Self {
        Delta::Update {
            id: id.into(),
            fields: FieldSet::odds(odds),
        }
    }

    /// Field update for any entity.
    pub fn update(id: impl Into<EntityId>, fields: FieldSet) -> Self {
        Delta::Update {
            id: id.into(),
            fields,
        }
    }

    /// Availability flip.
    pub fn availability(id: impl Into<EntityId>, available: bool) -> Self {
        Delta::Availability {
            id: id.into(),
            available,
        }
    }

    /// Structural removal.
    pub fn remove(id: impl Into<EntityId>) -> Self {
        Delta::Remove { id: id.into() }
    }

    /// Entity addressed by this delta, if it addresses a single one.
    pub fn target(&self) -> Option<&EntityId> {
        match self {
            Delta::Update { id, .. } | Delta::Availability { id, .. } | Delta::Remove { id } => {
                Some(id)
            }
            Delta::AddMarket { market } => Some(&market.id),
            Delta::AddOutcome { outcome } => Some(&outcome.id),
            Delta::Replace { root } => Some(root.id()),
            Delta::SessionExpired { .. } => None,
        }
    }

    /// True for deltas that end the topic.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Delta::SessionExpired { .. })
    }

    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Delta::Update { .. } => "update",
            Delta::Availability { .. } => "availability",
            Delta::AddMarket { .. } => "add_market",
            Delta::AddOutcome { .. } => "add_outcome",
            Delta::Remove { .. } => "remove",
            Delta::Replace { .. } => "replace",
            Delta::SessionExpired { .. } => "session_expired",
        }
    }
}

/// Event delivered by a persistent push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// The transport confirmed the subscription.
    Connected,
    /// A raw payload, to be decoded into a [`Delta`].
    Message(Bytes),
    /// The channel was lost.
    Disconnected {
        /// Transport-provided reason, if any.
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_wire_shape() {
        let delta = Delta::odds("O1", Odds::new(2, 1).unwrap());
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["id"], "O1");
        assert_eq!(json["fields"]["odds"]["numerator"], 2);
        assert!(json["fields"].get("status").is_none());
    }

    #[test]
    fn session_expired_reason_is_optional() {
        let delta: Delta = serde_json::from_str(r#"{"type":"session_expired"}"#).unwrap();
        assert_eq!(delta, Delta::SessionExpired { reason: None });
        assert!(delta.is_terminal());
        assert!(delta.target().is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<Delta>(r#"{"type":"teleport","id":"O1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn field_set_builders() {
        let fields = FieldSet::score(1, 0)
            .with_status("2H")
            .with_match_time("67'")
            .with_market_count(40);
        assert_eq!(fields.score, Some(Score { home: 1, away: 0 }));
        assert_eq!(fields.status.as_deref(), Some("2H"));
        assert!(!fields.is_empty());
        assert!(FieldSet::default().is_empty());
    }

    #[test]
    fn targets() {
        assert_eq!(Delta::remove("M1").target().unwrap().as_str(), "M1");
        assert_eq!(Delta::availability("O2", false).kind_name(), "availability");
    }
}
