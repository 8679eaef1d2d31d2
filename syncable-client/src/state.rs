//! Per-subject and per-resource state of the client engine.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use syncable_types::{ChangePacketId, SyncableId};

use crate::definition::SyncableDefinition;
use crate::protocol::{Change, Resource, Subscription, SubscriptionId};

/// Subscription lifecycle of a syncable subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    /// A subscription was sent and awaits its acknowledgement.
    Subscribing,
    /// The current subscription was acknowledged; events are applied.
    Subscribed,
}

/// Last confirmed value of a resource plus the local changes not yet
/// confirmed, in issue order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceData {
    pub snapshot: Option<Resource>,
    pub changes: VecDeque<Change>,
}

impl ResourceData {
    pub fn confirmed(snapshot: Resource) -> Self {
        Self {
            snapshot: Some(snapshot),
            changes: VecDeque::new(),
        }
    }

    /// Pops the oldest pending change if it is the one confirmed.
    pub fn confirm_head(&mut self, id: &ChangePacketId) -> bool {
        if self.changes.front().is_some_and(|change| change.id == *id) {
            self.changes.pop_front();
            true
        } else {
            false
        }
    }

    pub fn discard(&mut self, id: &ChangePacketId) -> bool {
        let before = self.changes.len();
        self.changes.retain(|change| change.id != *id);
        self.changes.len() != before
    }

    /// Nothing confirmed and nothing pending.
    pub fn is_vacant(&self) -> bool {
        self.snapshot.is_none() && self.changes.is_empty()
    }
}

/// Rebases the pending changes onto the confirmed snapshot and filters the
/// outcome through the visibility predicate.
pub(crate) fn recompute(
    definition: &dyn SyncableDefinition,
    data: &ResourceData,
) -> Option<Resource> {
    let mut current = data.snapshot.clone();

    for change in &data.changes {
        current = if change.is_creation() {
            Some(definition.create(change))
        } else if change.is_removal() {
            None
        } else {
            current.map(|resource| definition.update(&resource, change))
        };

        if let Some(resource) = current.as_mut() {
            resource.syncing = true;
        }
    }

    current.filter(|resource| definition.test_visibility(resource))
}

/// A registered syncable subject.
pub(crate) struct SyncableSubject {
    pub definition: Arc<dyn SyncableDefinition>,
    pub state: SubscriptionState,
    pub subscription: Option<SubscriptionId>,
    pub ready: bool,
    /// Server clock of the last applied snapshot or broadcast.
    pub timestamp: Option<u64>,
    pub data: BTreeMap<SyncableId, ResourceData>,
    /// Displayed (visible) resources.
    pub resources: BTreeMap<SyncableId, Resource>,
}

impl SyncableSubject {
    pub fn new(definition: Arc<dyn SyncableDefinition>) -> Self {
        Self {
            definition,
            state: SubscriptionState::Unsubscribed,
            subscription: None,
            ready: false,
            timestamp: None,
            data: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    /// Starts a new subscription attempt, superseding any previous one.
    pub fn subscribe(&mut self, name: &str) -> Subscription {
        let id = SubscriptionId::new();
        self.subscription = Some(id);
        self.state = SubscriptionState::Subscribing;

        Subscription {
            id,
            subject: name.to_string(),
            timestamp: self.timestamp,
            loaded: self
                .timestamp
                .map(|_| self.resources.keys().cloned().collect()),
            parameters: self.definition.generate_subscription(),
        }
    }

    /// Recomputes the displayed value of a resource from its data.
    ///
    /// Returns the `(before, after)` pair when the displayed value changed.
    pub fn refresh(&mut self, id: &SyncableId) -> Option<(Option<Resource>, Option<Resource>)> {
        let next = self
            .data
            .get(id)
            .and_then(|data| recompute(self.definition.as_ref(), data));

        if self.resources.get(id) == next.as_ref() {
            return None;
        }

        let previous = match &next {
            Some(resource) => self.resources.insert(id.clone(), resource.clone()),
            None => self.resources.remove(id),
        };

        Some((previous, next))
    }

    pub fn pending_changes(&self, id: &SyncableId) -> usize {
        self.data.get(id).map_or(0, |data| data.changes.len())
    }
}
