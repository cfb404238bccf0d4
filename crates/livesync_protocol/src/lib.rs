//! # LiveSync Protocol
//!
//! Data types shared by the live content synchronization engine.
//!
//! This crate provides:
//! - `TopicDescriptor` and `SessionCredential` for naming streams
//! - Entities (`Event`, `Market`, `Outcome`, `Wallet`) with exact `Odds`
//! - The closed `Delta` enum and the `PushEvent` envelope
//! - `DeltaDecoder` with JSON and CBOR implementations
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod delta;
mod entity;
mod error;
mod topic;

pub use decoder::{CborDeltaDecoder, DeltaDecoder, JsonDeltaDecoder};
pub use delta::{Delta, FieldSet, PushEvent};
pub use entity::{
    Entity, EntityId, EntityKind, Event, Market, Odds, Outcome, RootEntity, Score, Wallet,
};
pub use error::{DecodeError, DecodeResult};
pub use topic::{ContentKind, SessionCredential, TopicDescriptor};
