//! In-memory snapshot of one topic with delta application.
//!
//! The store keeps the root aggregate plus an id index of every nested
//! entity. Markets live in an order-preserving index (insertion order is
//! presentation order), so structural adds and removes re-derive the root
//! without sorting.
//!
//! Entities are immutable `Arc` values. A write builds new values and swaps
//! them in under the write lock; readers clone the `Arc`s they need.
//!
//! Notification is fine-grained: every watched entity has its own
//! `tokio::sync::watch` channel, woken only when that entity's value
//! actually changes.

use livesync_protocol::{
    Delta, Entity, EntityId, Event, FieldSet, Market, Outcome, RootEntity, TopicDescriptor,
    Wallet,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Receiver for a single entity's updates.
pub type EntityWatch = watch::Receiver<Entity>;

/// Receiver for root updates. `None` while the store is not seeded.
pub type RootWatch = watch::Receiver<Option<RootEntity>>;

/// Markets keyed by id, iterated in insertion order.
#[derive(Default)]
struct MarketIndex {
    order: Vec<EntityId>,
    by_id: HashMap<EntityId, Arc<Market>>,
}

impl MarketIndex {
    /// Inserts a market. An existing id keeps its position.
    fn insert(&mut self, market: Arc<Market>) -> Option<Arc<Market>> {
        let previous = self.by_id.insert(market.id.clone(), Arc::clone(&market));
        if previous.is_none() {
            self.order.push(market.id.clone());
        }
        previous
    }

    fn get(&self, id: &EntityId) -> Option<&Arc<Market>> {
        self.by_id.get(id)
    }

    fn remove(&mut self, id: &EntityId) -> Option<Arc<Market>> {
        let removed = self.by_id.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    fn values(&self) -> impl Iterator<Item = &Arc<Market>> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct OutcomeSlot {
    outcome: Arc<Outcome>,
    market: EntityId,
}

/// Result of applying one delta to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyStatus {
    Changed,
    Unchanged,
    Unknown,
}

/// What a write touched, for publication.
#[derive(Default)]
struct Changes {
    entities: Vec<Entity>,
    removed: Vec<EntityId>,
    root: bool,
    nested: bool,
}

impl Changes {
    fn touch(&mut self, entity: Entity) {
        self.entities.push(entity);
    }
}

#[derive(Default)]
struct StoreState {
    root: Option<RootEntity>,
    markets: MarketIndex,
    outcomes: HashMap<EntityId, OutcomeSlot>,
}

impl StoreState {
    fn get(&self, id: &EntityId) -> Option<Entity> {
        if let Some(root) = self.root.as_ref().filter(|root| root.id() == id) {
            return Some(Entity::from(root.clone()));
        }
        if let Some(market) = self.markets.get(id) {
            return Some(Entity::Market(Arc::clone(market)));
        }
        self.outcomes
            .get(id)
            .map(|slot| Entity::Outcome(Arc::clone(&slot.outcome)))
    }

    fn len(&self) -> usize {
        self.root.iter().count() + self.markets.len() + self.outcomes.len()
    }

    fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.root.iter().map(|root| root.id().clone()).collect();
        ids.extend(self.markets.order.iter().cloned());
        ids.extend(self.outcomes.keys().cloned());
        ids
    }

    /// Replaces the whole state with `root` and re-indexes nested entities.
    fn install(&mut self, root: RootEntity, changes: &mut Changes) -> ApplyStatus {
        let previous_ids = self.ids();
        let previous_root = self.root.take();
        self.markets = MarketIndex::default();
        self.outcomes.clear();

        if let RootEntity::Event(event) = &root {
            for market in &event.markets {
                self.index_market(Arc::clone(market));
            }
        }
        self.root = Some(root);
        self.rederive_root();

        for market in self.markets.values() {
            changes.touch(Entity::Market(Arc::clone(market)));
        }
        for slot in self.outcomes.values() {
            changes.touch(Entity::Outcome(Arc::clone(&slot.outcome)));
        }
        changes.removed = previous_ids
            .into_iter()
            .filter(|id| self.get(id).is_none())
            .collect();

        if previous_root == self.root {
            ApplyStatus::Unchanged
        } else {
            changes.root = true;
            ApplyStatus::Changed
        }
    }

    fn index_market(&mut self, market: Arc<Market>) {
        if let Some(previous) = self.markets.insert(Arc::clone(&market)) {
            for outcome in &previous.outcomes {
                self.drop_slot(&outcome.id, &market.id);
            }
        }
        for outcome in &market.outcomes {
            self.outcomes.insert(
                outcome.id.clone(),
                OutcomeSlot {
                    outcome: Arc::clone(outcome),
                    market: market.id.clone(),
                },
            );
        }
    }

    /// Removes an outcome's index slot if it still belongs to `market_id`.
    fn drop_slot(&mut self, outcome_id: &EntityId, market_id: &EntityId) -> bool {
        if self
            .outcomes
            .get(outcome_id)
            .is_some_and(|slot| slot.market == *market_id)
        {
            self.outcomes.remove(outcome_id);
            return true;
        }
        false
    }

    /// Rebuilds the root's market list from the ordered index.
    fn rederive_root(&mut self) {
        if let Some(RootEntity::Event(event)) = &self.root {
            let markets: Vec<Arc<Market>> = self.markets.values().cloned().collect();
            if event.markets != markets {
                let next = Event {
                    markets,
                    ..(**event).clone()
                };
                self.root = Some(RootEntity::Event(Arc::new(next)));
            }
        }
    }

    fn update_fields(
        &mut self,
        id: &EntityId,
        fields: &FieldSet,
        changes: &mut Changes,
    ) -> ApplyStatus {
        match self.root.as_ref() {
            Some(RootEntity::Event(event)) if event.id == *id => {
                let mut next = (**event).clone();
                if let Some(status) = &fields.status {
                    next.status = Some(status.clone());
                }
                if let Some(match_time) = &fields.match_time {
                    next.match_time = Some(match_time.clone());
                }
                if let Some(score) = fields.score {
                    next.score = Some(score);
                }
                if let Some(count) = fields.market_count {
                    next.market_count = count;
                }
                if next == **event {
                    return ApplyStatus::Unchanged;
                }
                self.root = Some(RootEntity::Event(Arc::new(next)));
                changes.root = true;
                return ApplyStatus::Changed;
            }
            Some(RootEntity::Wallet(wallet)) if wallet.id == *id => {
                let next = Wallet {
                    total: fields.total.unwrap_or(wallet.total),
                    withdrawable: fields.withdrawable.unwrap_or(wallet.withdrawable),
                    bonus: fields.bonus.unwrap_or(wallet.bonus),
                    ..(**wallet).clone()
                };
                if next == **wallet {
                    return ApplyStatus::Unchanged;
                }
                self.root = Some(RootEntity::Wallet(Arc::new(next)));
                changes.root = true;
                return ApplyStatus::Changed;
            }
            _ => {}
        }

        if let Some(market) = self.markets.get(id) {
            let Some(name) = fields.name.as_ref().filter(|name| **name != market.name) else {
                return ApplyStatus::Unchanged;
            };
            let next = Market {
                name: name.clone(),
                ..(**market).clone()
            };
            self.replace_market(Arc::new(next), changes);
            return ApplyStatus::Changed;
        }

        if let Some(slot) = self.outcomes.get(id) {
            let current = &slot.outcome;
            let next = Outcome {
                name: fields.name.clone().unwrap_or_else(|| current.name.clone()),
                odds: fields.odds.unwrap_or(current.odds),
                ..(**current).clone()
            };
            if next == **current {
                return ApplyStatus::Unchanged;
            }
            return self.replace_outcome(Arc::new(next), changes);
        }

        ApplyStatus::Unknown
    }

    fn set_available(&mut self, id: &EntityId, available: bool, changes: &mut Changes) -> ApplyStatus {
        if let Some(market) = self.markets.get(id) {
            if market.tradable == available {
                return ApplyStatus::Unchanged;
            }
            let next = Market {
                tradable: available,
                ..(**market).clone()
            };
            self.replace_market(Arc::new(next), changes);
            return ApplyStatus::Changed;
        }

        if let Some(slot) = self.outcomes.get(id) {
            if slot.outcome.tradable == available {
                return ApplyStatus::Unchanged;
            }
            let next = Outcome {
                tradable: available,
                ..(*slot.outcome).clone()
            };
            return self.replace_outcome(Arc::new(next), changes);
        }

        ApplyStatus::Unknown
    }

    /// Swaps in a market whose outcome list is unchanged.
    fn replace_market(&mut self, market: Arc<Market>, changes: &mut Changes) {
        self.markets.insert(Arc::clone(&market));
        changes.touch(Entity::Market(market));
        changes.nested = true;
    }

    /// Swaps in an outcome and rebuilds its parent market around it.
    fn replace_outcome(&mut self, outcome: Arc<Outcome>, changes: &mut Changes) -> ApplyStatus {
        let Some(market_id) = self.outcomes.get(&outcome.id).map(|slot| slot.market.clone())
        else {
            return ApplyStatus::Unknown;
        };
        let Some(market) = self.markets.get(&market_id) else {
            return ApplyStatus::Unknown;
        };

        let mut next = (**market).clone();
        for slot in next.outcomes.iter_mut() {
            if slot.id == outcome.id {
                *slot = Arc::clone(&outcome);
            }
        }
        let next = Arc::new(next);

        self.outcomes.insert(
            outcome.id.clone(),
            OutcomeSlot {
                outcome: Arc::clone(&outcome),
                market: market_id,
            },
        );
        changes.touch(Entity::Outcome(outcome));
        self.replace_market(next, changes);
        ApplyStatus::Changed
    }

    fn add_market(&mut self, market: Market, changes: &mut Changes) -> ApplyStatus {
        if !matches!(self.root, Some(RootEntity::Event(_))) {
            return ApplyStatus::Unknown;
        }
        if self.markets.get(&market.id).map(|existing| **existing == market) == Some(true) {
            return ApplyStatus::Unchanged;
        }

        if let Some(previous) = self.markets.get(&market.id) {
            for outcome in &previous.outcomes {
                if !market.outcomes.iter().any(|o| o.id == outcome.id) {
                    changes.removed.push(outcome.id.clone());
                }
            }
        }

        // Outcomes taken over from another market leave their old parent.
        let moved: Vec<(EntityId, EntityId)> = market
            .outcomes
            .iter()
            .filter_map(|outcome| {
                self.outcomes
                    .get(&outcome.id)
                    .filter(|slot| slot.market != market.id)
                    .map(|slot| (slot.market.clone(), outcome.id.clone()))
            })
            .collect();
        for (old_market, outcome_id) in &moved {
            self.detach_outcome(old_market, outcome_id, changes);
        }

        let market = Arc::new(market);
        self.index_market(Arc::clone(&market));
        for outcome in &market.outcomes {
            changes.touch(Entity::Outcome(Arc::clone(outcome)));
        }
        changes.touch(Entity::Market(market));
        changes.nested = true;
        ApplyStatus::Changed
    }

    fn add_outcome(&mut self, outcome: Outcome, changes: &mut Changes) -> ApplyStatus {
        let Some(market) = self.markets.get(&outcome.market_id) else {
            return ApplyStatus::Unknown;
        };
        if let Some(slot) = self.outcomes.get(&outcome.id) {
            if *slot.outcome == outcome && slot.market == outcome.market_id {
                return ApplyStatus::Unchanged;
            }
        }

        let outcome = Arc::new(outcome);
        let mut next = (**market).clone();
        match next.outcomes.iter_mut().find(|slot| slot.id == outcome.id) {
            Some(slot) => *slot = Arc::clone(&outcome),
            None => next.outcomes.push(Arc::clone(&outcome)),
        }

        // An outcome that moved markets leaves its old parent.
        if let Some(old_market) = self
            .outcomes
            .get(&outcome.id)
            .map(|slot| slot.market.clone())
            .filter(|old| *old != outcome.market_id)
        {
            self.detach_outcome(&old_market, &outcome.id, changes);
        }

        self.outcomes.insert(
            outcome.id.clone(),
            OutcomeSlot {
                outcome: Arc::clone(&outcome),
                market: outcome.market_id.clone(),
            },
        );
        changes.touch(Entity::Outcome(outcome));
        self.replace_market(Arc::new(next), changes);
        ApplyStatus::Changed
    }

    fn detach_outcome(&mut self, market_id: &EntityId, outcome_id: &EntityId, changes: &mut Changes) {
        if let Some(market) = self.markets.get(market_id) {
            let mut next = (**market).clone();
            next.outcomes.retain(|outcome| outcome.id != *outcome_id);
            self.replace_market(Arc::new(next), changes);
        }
    }

    fn remove(&mut self, id: &EntityId, changes: &mut Changes) -> ApplyStatus {
        if let Some(market) = self.markets.remove(id) {
            for outcome in &market.outcomes {
                if self.drop_slot(&outcome.id, id) {
                    changes.removed.push(outcome.id.clone());
                }
            }
            changes.removed.push(id.clone());
            changes.nested = true;
            return ApplyStatus::Changed;
        }

        if let Some(slot) = self.outcomes.remove(id) {
            self.detach_outcome(&slot.market, id, changes);
            changes.removed.push(id.clone());
            return ApplyStatus::Changed;
        }

        ApplyStatus::Unknown
    }
}

/// Authoritative in-memory snapshot of one topic.
///
/// Writes (`seed`, `apply`, `clear`) are serialized by an internal lock
/// and published in the order they are applied.
pub struct DeltaStore {
    topic: TopicDescriptor,
    state: RwLock<StoreState>,
    watchers: Mutex<HashMap<EntityId, watch::Sender<Entity>>>,
    root_tx: watch::Sender<Option<RootEntity>>,
}

impl DeltaStore {
    /// Creates an empty, unseeded store.
    pub fn new(topic: TopicDescriptor) -> Self {
        let (root_tx, _) = watch::channel(None);
        Self {
            topic,
            state: RwLock::new(StoreState::default()),
            watchers: Mutex::new(HashMap::new()),
            root_tx,
        }
    }

    /// Topic this store holds.
    pub fn topic(&self) -> &TopicDescriptor {
        &self.topic
    }

    /// Replaces the entire state with `root` and re-indexes nested entities.
    ///
    /// Seeding twice with the same root leaves the store observably
    /// unchanged and wakes nobody the second time.
    pub fn seed(&self, root: RootEntity) {
        let mut state = self.state.write();
        let mut changes = Changes::default();
        state.install(root, &mut changes);
        debug!(topic = %self.topic, entities = state.len(), "seeded store");
        self.publish(&state, changes);
    }

    /// Applies one delta.
    ///
    /// Returns the updated root when the delta changed anything, `None`
    /// for a no-op, an unknown target, or an unseeded store.
    pub fn apply(&self, delta: Delta) -> Option<RootEntity> {
        let mut state = self.state.write();
        if state.root.is_none() {
            debug!(topic = %self.topic, kind = delta.kind_name(), "dropping delta for unseeded topic");
            return None;
        }

        let kind = delta.kind_name();
        let target = delta.target().cloned();
        let mut changes = Changes::default();
        let status = match delta {
            Delta::Update { id, fields } => state.update_fields(&id, &fields, &mut changes),
            Delta::Availability { id, available } => {
                state.set_available(&id, available, &mut changes)
            }
            Delta::AddMarket { market } => state.add_market(market, &mut changes),
            Delta::AddOutcome { outcome } => state.add_outcome(outcome, &mut changes),
            Delta::Remove { id } => state.remove(&id, &mut changes),
            Delta::Replace { root } => state.install(root, &mut changes),
            Delta::SessionExpired { .. } => ApplyStatus::Unchanged,
        };

        match status {
            ApplyStatus::Changed => {
                if changes.nested {
                    state.rederive_root();
                    changes.root = true;
                }
                let root = state.root.clone();
                self.publish(&state, changes);
                root
            }
            ApplyStatus::Unchanged => {
                // Replace may still move nested values or drop ids.
                self.publish(&state, changes);
                None
            }
            ApplyStatus::Unknown => {
                debug!(
                    topic = %self.topic,
                    kind,
                    target = ?target.as_ref().map(EntityId::as_str),
                    "ignoring delta for unknown entity"
                );
                None
            }
        }
    }

    /// Point lookup by id.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.state.read().get(id)
    }

    /// Returns true if an entity with this id is present.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.state.read().get(id).is_some()
    }

    /// Current root, if seeded.
    pub fn root(&self) -> Option<RootEntity> {
        self.state.read().root.clone()
    }

    /// Markets in presentation order.
    pub fn markets(&self) -> Vec<Arc<Market>> {
        self.state.read().markets.values().cloned().collect()
    }

    /// Returns true once a snapshot has been seeded.
    pub fn is_seeded(&self) -> bool {
        self.state.read().root.is_some()
    }

    /// Number of indexed entities, root included.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all state and closes every entity subscription.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = StoreState::default();
        self.watchers.lock().clear();
        self.root_tx.send_if_modified(|current| current.take().is_some());
        debug!(topic = %self.topic, "cleared store");
    }

    /// Subscribes to root updates.
    pub fn subscribe_root(&self) -> RootWatch {
        self.root_tx.subscribe()
    }

    /// Subscribes to one entity. `None` if the id is unknown.
    ///
    /// The receiver only wakes when this entity's value changes, and closes
    /// when the entity is removed or the store is cleared.
    pub fn subscribe_entity(&self, id: &EntityId) -> Option<EntityWatch> {
        let state = self.state.read();
        let current = state.get(id)?;
        let mut watchers = self.watchers.lock();
        let sender = watchers
            .entry(id.clone())
            .or_insert_with(|| watch::channel(current).0);
        Some(sender.subscribe())
    }

    fn publish(&self, state: &StoreState, changes: Changes) {
        let mut watchers = self.watchers.lock();

        for entity in changes.entities {
            if let Some(sender) = watchers.get(entity.id()) {
                sender.send_if_modified(|current| replace_if_changed(current, entity));
            }
        }
        for id in &changes.removed {
            watchers.remove(id);
        }

        if changes.root {
            if let Some(root) = state.root.clone() {
                if let Some(sender) = watchers.get(root.id()) {
                    let entity = Entity::from(root.clone());
                    sender.send_if_modified(|current| replace_if_changed(current, entity));
                }
                self.root_tx
                    .send_if_modified(|current| replace_if_changed(current, Some(root)));
            }
        }

        watchers.retain(|_, sender| sender.receiver_count() > 0);
    }
}

fn replace_if_changed<T: PartialEq>(current: &mut T, next: T) -> bool {
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}
