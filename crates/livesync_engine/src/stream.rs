//! Outward notification channel of a topic.
//!
//! Every consumer owns a small queue. Consecutive `Updated` items collapse to
//! the newest one, so a slow consumer only ever falls behind by one payload;
//! lifecycle items and errors are always delivered, in order.

use crate::error::LiveResult;
use crate::registry::SubscriptionHandle;
use livesync_protocol::RootEntity;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// The three states a consumer can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The topic is subscribed.
    Connected,
    /// A new payload is available.
    Updated,
    /// The topic is gone for good.
    Disconnected,
}

/// One item of a [`ContentStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUpdate {
    /// The topic is subscribed under this handle.
    Connected(SubscriptionHandle),
    /// Current root after a change.
    Updated(RootEntity),
    /// The topic stopped. Always the last lifecycle item.
    Disconnected,
}

impl ContentUpdate {
    /// Connection state carried by this item.
    pub fn state(&self) -> ConnectionState {
        match self {
            ContentUpdate::Connected(_) => ConnectionState::Connected,
            ContentUpdate::Updated(_) => ConnectionState::Updated,
            ContentUpdate::Disconnected => ConnectionState::Disconnected,
        }
    }

    /// Payload, for `Updated` items.
    pub fn payload(&self) -> Option<&RootEntity> {
        match self {
            ContentUpdate::Updated(root) => Some(root),
            _ => None,
        }
    }
}

/// Item type of a [`ContentStream`].
pub type StreamItem = LiveResult<ContentUpdate>;

/// Why a topic stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The owner asked for it.
    Requested,
    /// The server expired the session.
    SessionExpired,
    /// Anything else, e.g. reconnection giving up.
    Other(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "requested"),
            StopReason::SessionExpired => write!(f, "session expired"),
            StopReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Default)]
struct SlotQueue {
    items: VecDeque<StreamItem>,
    closed: Option<StopReason>,
}

#[derive(Default)]
struct Slot {
    queue: Mutex<SlotQueue>,
    notify: Notify,
}

impl Slot {
    fn push(&self, item: StreamItem) {
        {
            let mut queue = self.queue.lock();
            let conflates = matches!(item, Ok(ContentUpdate::Updated(_)))
                && matches!(queue.items.back(), Some(Ok(ContentUpdate::Updated(_))));
            if conflates {
                queue.items.pop_back();
            }
            queue.items.push_back(item);
        }
        self.notify.notify_one();
    }

    fn close(&self, reason: StopReason) {
        self.queue.lock().closed.get_or_insert(reason);
        self.notify.notify_one();
    }
}

#[derive(Default)]
struct ChannelState {
    slots: Vec<Weak<Slot>>,
    connected: Option<SubscriptionHandle>,
    latest: Option<RootEntity>,
    closed: Option<StopReason>,
}

/// Producer side, owned by the coordinator.
#[derive(Default)]
pub(crate) struct OutputChannel {
    state: Mutex<ChannelState>,
}

impl OutputChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a consumer. A late consumer is primed with `Connected` and the
    /// latest payload; a consumer of a closed channel sees it closed.
    pub(crate) fn subscribe(&self) -> ContentStream {
        let slot = Arc::new(Slot::default());
        let mut state = self.state.lock();

        if let Some(reason) = &state.closed {
            slot.close(reason.clone());
        } else {
            if let Some(handle) = &state.connected {
                slot.push(Ok(ContentUpdate::Connected(handle.clone())));
                if let Some(root) = &state.latest {
                    slot.push(Ok(ContentUpdate::Updated(root.clone())));
                }
            }
            state.slots.push(Arc::downgrade(&slot));
        }

        ContentStream { slot }
    }

    /// Delivers an item to every live consumer. No-op once closed.
    pub(crate) fn emit(&self, item: StreamItem) {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return;
        }
        match &item {
            Ok(ContentUpdate::Connected(handle)) => state.connected = Some(handle.clone()),
            Ok(ContentUpdate::Updated(root)) => state.latest = Some(root.clone()),
            _ => {}
        }
        state.slots.retain(|slot| match slot.upgrade() {
            Some(slot) => {
                slot.push(item.clone());
                true
            }
            None => false,
        });
    }

    /// Closes every consumer after its queued items drain.
    pub(crate) fn close(&self, reason: StopReason) {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return;
        }
        for slot in state.slots.drain(..).filter_map(|slot| slot.upgrade()) {
            slot.close(reason.clone());
        }
        state.closed = Some(reason);
        state.latest = None;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    /// Number of consumers still holding their stream.
    #[cfg(test)]
    pub(crate) fn consumer_count(&self) -> usize {
        let mut state = self.state.lock();
        state.slots.retain(|slot| slot.strong_count() > 0);
        state.slots.len()
    }
}

/// Consumer side of a topic's notifications.
///
/// Dropping the stream unsubscribes this consumer only; the topic keeps
/// running until its coordinator is stopped.
pub struct ContentStream {
    slot: Arc<Slot>,
}

impl ContentStream {
    /// Waits for the next item. Returns `None` once the topic is closed and
    /// every queued item has been delivered.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        let slot = &self.slot;
        loop {
            let notified = slot.notify.notified();
            {
                let mut queue = slot.queue.lock();
                if let Some(item) = queue.items.pop_front() {
                    return Some(item);
                }
                if queue.closed.is_some() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Takes the next queued item without waiting.
    pub fn try_recv(&mut self) -> Option<StreamItem> {
        self.slot.queue.lock().items.pop_front()
    }

    /// Returns true once the topic has closed this stream.
    pub fn is_closed(&self) -> bool {
        self.slot.queue.lock().closed.is_some()
    }

    /// Why the stream was closed, if it was.
    pub fn close_reason(&self) -> Option<StopReason> {
        self.slot.queue.lock().closed.clone()
    }

    /// Number of items waiting to be received.
    pub fn pending(&self) -> usize {
        self.slot.queue.lock().items.len()
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("pending", &self.pending())
            .field("closed", &self.close_reason())
            .finish()
    }
}
