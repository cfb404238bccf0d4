//! # LiveSync Engine
//!
//! Live content synchronization engine.
//!
//! This crate provides:
//! - Delta store (snapshot + in-order delta application, per-entity watches)
//! - Reconnection with bounded exponential backoff
//! - Subscription registry with dependent subscriptions
//! - Transport abstraction with a scriptable mock
//! - Per-topic coordinator with a conflating output stream
//!
//! ## Architecture
//!
//! Every topic follows a **snapshot-then-deltas** model:
//! 1. Fetch the full snapshot and seed the store
//! 2. Open the push subscription
//! 3. Apply pushed deltas in arrival order and publish the new root
//!
//! When the push stream drops, the coordinator re-subscribes after a
//! growing delay. The snapshot is not refetched; the server re-sends
//! whatever is needed on the new subscription.
//!
//! ## Key Invariants
//!
//! - One writer per topic: deltas are applied strictly in arrival order
//! - Deltas are idempotent; a no-op delta publishes nothing
//! - Unknown entity ids and undecodable payloads are dropped, never fatal
//! - Consumers see at most one `Disconnected`, and it is the last event
//! - At most one live push subscription per topic

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod reconnect;
mod registry;
mod store;
mod stream;
mod transport;

pub use config::{CoordinatorConfig, ReconnectConfig};
pub use coordinator::{ContentStreamCoordinator, LiveStats};
pub use error::{LiveError, LiveResult};
pub use reconnect::{ReconnectState, ReconnectionController, RetryState};
pub use registry::{SubscriptionHandle, SubscriptionId, SubscriptionRegistry, Teardown};
pub use store::{DeltaStore, EntityWatch, RootWatch};
pub use stream::{ConnectionState, ContentStream, ContentUpdate, StopReason, StreamItem};
pub use transport::{ContentTransport, MockTransport, PushStream};
