//! Error types for the synchronization engine.

use crate::registry::SubscriptionId;
use thiserror::Error;

/// Result type for engine operations.
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors that can occur while synchronizing a topic.
///
/// Errors local to one delta (decode failures, unknown entity ids) are
/// absorbed by the engine. Only errors that make a topic unreliable reach
/// consumers, once, as the terminal item of the output stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// Network, HTTP or channel failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Reconnection gave up.
    #[error("gave up reconnecting after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The coordinator is not running.
    #[error("topic is not active")]
    NotActive,

    /// A handle that the registry does not know.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// The child already belongs to another parent.
    #[error("subscription {child} is already associated with {parent}")]
    AlreadyAssociated {
        /// Child subscription.
        child: SubscriptionId,
        /// Its current parent.
        parent: SubscriptionId,
    },

    /// The association would link a subscription to itself or form a cycle.
    #[error("invalid association of {child} under {parent}")]
    InvalidAssociation {
        /// Requested parent.
        parent: SubscriptionId,
        /// Requested child.
        child: SubscriptionId,
    },
}

impl LiveError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// A push subscription refused with a non-retryable error ends the topic.
    pub fn is_retryable(&self) -> bool {
        match self {
            LiveError::Transport { retryable, .. } => *retryable,
            LiveError::Timeout => true,
            _ => false,
        }
    }
}
