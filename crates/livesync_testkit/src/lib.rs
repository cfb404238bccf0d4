//! # LiveSync Testkit
//!
//! Test utilities for LiveSync.
//!
//! This crate provides:
//! - Event and wallet fixtures with builders
//! - Payload helpers that encode deltas the way a server would
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livesync_testkit::prelude::*;
//!
//! #[test]
//! fn odds_update() {
//!     let root = sample_event();
//!     let payload = json_payload(&Delta::odds("O1", odds(2, 1)));
//!     // ... feed the payload to a transport
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use livesync_protocol::{Delta, FieldSet, PushEvent, RootEntity, TopicDescriptor};
}

pub use fixtures::*;
pub use generators::*;
