//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised at the decode boundary.
///
/// A decode error is local to one payload: the engine drops the payload and
/// keeps the stream running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload was not valid JSON for a delta.
    #[error("json decode failed: {0}")]
    Json(String),

    /// Payload was not valid CBOR for a delta.
    #[error("cbor decode failed: {0}")]
    Cbor(String),

    /// Fractional odds with a zero denominator.
    #[error("invalid odds {numerator}/{denominator}")]
    InvalidOdds {
        /// Numerator as received.
        numerator: u32,
        /// Denominator as received.
        denominator: u32,
    },

    /// Structurally valid payload with unusable content.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e.to_string())
    }
}

impl<E: std::fmt::Debug> From<ciborium::de::Error<E>> for DecodeError {
    fn from(e: ciborium::de::Error<E>) -> Self {
        DecodeError::Cbor(format!("{e:?}"))
    }
}
