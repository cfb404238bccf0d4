//! Registry of live subscriptions with parent/child composition.
//!
//! A subscription can carry dependent subscriptions: unsubscribing the
//! parent unsubscribes every descendant. Handles never point back at their
//! coordinator; teardown goes through a callback the owner installs when it
//! builds the registry.

use crate::error::{LiveError, LiveResult};
use livesync_protocol::{SessionCredential, TopicDescriptor};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One logical interest in a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: TopicDescriptor,
    credential: SessionCredential,
}

impl SubscriptionHandle {
    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed topic.
    pub fn topic(&self) -> &TopicDescriptor {
        &self.topic
    }

    /// Session credential used for the subscription.
    pub fn credential(&self) -> &SessionCredential {
        &self.credential
    }
}

/// Callback run for every handle that gets unsubscribed.
pub type Teardown = Arc<dyn Fn(&SubscriptionHandle) + Send + Sync>;

struct Entry {
    handle: SubscriptionHandle,
    parent: Option<SubscriptionId>,
    children: Vec<SubscriptionId>,
}

/// Tracks live subscriptions per topic.
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<SubscriptionId, Entry>>,
    teardown: Teardown,
}

impl SubscriptionRegistry {
    /// Creates a registry that calls `teardown` for every unsubscribed handle.
    pub fn new(teardown: Teardown) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            teardown,
        }
    }

    /// Creates a registry whose teardown does nothing.
    pub fn detached() -> Self {
        Self::new(Arc::new(|_: &SubscriptionHandle| {}))
    }

    /// Registers a new subscription.
    pub fn register(
        &self,
        topic: TopicDescriptor,
        credential: SessionCredential,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            id: SubscriptionId::generate(),
            topic,
            credential,
        };
        self.entries.write().insert(
            handle.id,
            Entry {
                handle: handle.clone(),
                parent: None,
                children: Vec::new(),
            },
        );
        handle
    }

    /// Links `child`'s lifetime to `parent`.
    ///
    /// Re-associating a child with its current parent is a no-op.
    pub fn associate(
        &self,
        parent: &SubscriptionHandle,
        child: &SubscriptionHandle,
    ) -> LiveResult<()> {
        let mut entries = self.entries.write();

        if !entries.contains_key(&parent.id) {
            return Err(LiveError::UnknownSubscription(parent.id));
        }
        let current_parent = match entries.get(&child.id) {
            Some(entry) => entry.parent,
            None => return Err(LiveError::UnknownSubscription(child.id)),
        };

        match current_parent {
            Some(existing) if existing == parent.id => return Ok(()),
            Some(existing) => {
                return Err(LiveError::AlreadyAssociated {
                    child: child.id,
                    parent: existing,
                })
            }
            None => {}
        }

        // Walk up from the parent; meeting the child means a cycle.
        let mut cursor = Some(parent.id);
        while let Some(id) = cursor {
            if id == child.id {
                return Err(LiveError::InvalidAssociation {
                    parent: parent.id,
                    child: child.id,
                });
            }
            cursor = entries.get(&id).and_then(|entry| entry.parent);
        }

        if let Some(entry) = entries.get_mut(&child.id) {
            entry.parent = Some(parent.id);
        }
        if let Some(entry) = entries.get_mut(&parent.id) {
            entry.children.push(child.id);
        }
        Ok(())
    }

    /// Unsubscribes `handle` and, recursively, every subscription it carries.
    ///
    /// Returns the number of subscriptions torn down; zero for a handle that
    /// is already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let Some(root) = entries.get(&handle.id) else {
                return 0;
            };

            if let Some(parent_id) = root.parent {
                if let Some(parent) = entries.get_mut(&parent_id) {
                    parent.children.retain(|id| *id != handle.id);
                }
            }

            let mut removed = Vec::new();
            let mut pending = vec![handle.id];
            while let Some(id) = pending.pop() {
                if let Some(entry) = entries.remove(&id) {
                    pending.extend(entry.children.iter().copied());
                    removed.push(entry.handle);
                }
            }
            removed
        };

        for handle in &removed {
            (self.teardown)(handle);
        }
        removed.len()
    }

    /// Returns true if the handle is still registered.
    pub fn is_active(&self, handle: &SubscriptionHandle) -> bool {
        self.entries.read().contains_key(&handle.id)
    }

    /// Handles carried directly by `parent`.
    pub fn children(&self, parent: &SubscriptionHandle) -> Vec<SubscriptionHandle> {
        let entries = self.entries.read();
        entries
            .get(&parent.id)
            .map(|entry| {
                entry
                    .children
                    .iter()
                    .filter_map(|id| entries.get(id).map(|child| child.handle.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live handles for a topic.
    pub fn active_for(&self, topic: &TopicDescriptor) -> Vec<SubscriptionHandle> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.handle.topic == *topic)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
