//! Pluggable decoders from raw push payloads to [`Delta`] values.
//!
//! The decode step is the single place where a payload's `type` tag is
//! validated. Everything past it works with the closed [`Delta`] enum.

use crate::delta::Delta;
use crate::error::{DecodeError, DecodeResult};

/// Turns a raw push payload into a delta.
///
/// Implementations must be deterministic and free of side effects: the
/// same bytes always decode to the same delta.
pub trait DeltaDecoder: Send + Sync {
    /// Decodes one payload.
    fn decode(&self, payload: &[u8]) -> DecodeResult<Delta>;
}

/// Decodes JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeltaDecoder;

impl DeltaDecoder for JsonDeltaDecoder {
    fn decode(&self, payload: &[u8]) -> DecodeResult<Delta> {
        if payload.is_empty() {
            return Err(DecodeError::InvalidPayload("empty payload".into()));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Decodes CBOR payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborDeltaDecoder;

impl DeltaDecoder for CborDeltaDecoder {
    fn decode(&self, payload: &[u8]) -> DecodeResult<Delta> {
        if payload.is_empty() {
            return Err(DecodeError::InvalidPayload("empty payload".into()));
        }
        Ok(ciborium::de::from_reader(payload)?)
    }
}

impl<D: DeltaDecoder + ?Sized> DeltaDecoder for std::sync::Arc<D> {
    fn decode(&self, payload: &[u8]) -> DecodeResult<Delta> {
        (**self).decode(payload)
    }
}
