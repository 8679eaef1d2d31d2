//! Client engine: reconciliation logic without I/O.
//!
//! The engine is a pure state machine. It consumes [`ServerEvent`]s and local
//! operations, queues outbound [`ClientEvent`]s and [`Notification`]s, and
//! exposes the next timer deadline. The orchestrator handles all I/O.
//!
//! Local changes are applied optimistically and queued per resource. Every
//! server confirmation replaces the confirmed snapshot and replays the
//! remaining queue on top of it, so speculative edits are always rebased onto
//! the latest authoritative state.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use syncable_types::{ChangePacketId, SyncableId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::compound::{CompoundDefinition, CompoundEffects, CompoundSubject};
use crate::config::ClientConfig;
use crate::definition::SyncableDefinition;
use crate::error::{ClientError, ClientResult};
use crate::notification::{ChangeNotification, Notification};
use crate::protocol::{
    CREATE, Change, ClientEvent, REMOVE, RawChange, RawCreation, Request, Resource, ServerEvent,
    SubscriptionId,
};
use crate::state::{ResourceData, SubscriptionState, SyncableSubject};

/// A local change sent and not yet confirmed.
#[derive(Debug, Clone)]
struct InFlight {
    subject: String,
    resource: SyncableId,
    sent_at: Instant,
}

/// Resource requests collected during the current coalescing window.
#[derive(Debug)]
struct PendingRequests {
    deadline: Instant,
    resources: BTreeMap<String, BTreeSet<SyncableId>>,
}

/// The client engine.
pub struct SyncClient {
    config: ClientConfig,
    subjects: BTreeMap<String, SyncableSubject>,
    compounds: BTreeMap<String, CompoundSubject>,
    /// Syncable subject -> compound subjects depending on it.
    dependents: HashMap<String, BTreeSet<String>>,
    in_flight: HashMap<ChangePacketId, InFlight>,
    pending_requests: Option<PendingRequests>,
    outbound: VecDeque<ClientEvent>,
    notifications: VecDeque<Notification>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            subjects: BTreeMap::new(),
            compounds: BTreeMap::new(),
            dependents: HashMap::new(),
            in_flight: HashMap::new(),
            pending_requests: None,
            outbound: VecDeque::new(),
            notifications: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registers a syncable subject.
    pub fn register(&mut self, subject: impl Into<String>, definition: impl SyncableDefinition + 'static) {
        self.register_shared(subject, Arc::new(definition));
    }

    pub fn register_shared(&mut self, subject: impl Into<String>, definition: Arc<dyn SyncableDefinition>) {
        self.subjects
            .insert(subject.into(), SyncableSubject::new(definition));
    }

    /// Registers a compound subject. Every dependency subject must already
    /// be registered.
    pub fn register_compound(
        &mut self,
        subject: impl Into<String>,
        definition: CompoundDefinition,
    ) -> ClientResult<()> {
        let subject = subject.into();

        if let Some(missing) = definition
            .dependencies()
            .iter()
            .find(|d| !self.subjects.contains_key(&d.subject))
        {
            return Err(ClientError::UnknownSubject(missing.subject.clone()));
        }

        for dependency in definition.dependencies() {
            self.dependents
                .entry(dependency.subject.clone())
                .or_default()
                .insert(subject.clone());
        }

        self.compounds
            .insert(subject.clone(), CompoundSubject::new(subject, definition));
        Ok(())
    }

    /// Sends a fresh subscription for every syncable subject. Used on start
    /// and after a reconnect.
    pub fn subscribe(&mut self) {
        for (name, subject) in &mut self.subjects {
            let subscription = subject.subscribe(name);
            debug!(subject = %name, subscription = %subscription.id, "subscribing");
            self.outbound.push_back(ClientEvent::Subscribe(subscription));
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    /// Displayed resources of a syncable subject.
    pub fn resources(&self, subject: &str) -> Option<&BTreeMap<SyncableId, Resource>> {
        self.subjects.get(subject).map(|s| &s.resources)
    }

    pub fn resource(&self, subject: &str, id: &SyncableId) -> Option<&Resource> {
        self.subjects.get(subject)?.resources.get(id)
    }

    /// Materialized values of a compound subject.
    pub fn compound_resources(&self, subject: &str) -> Option<&BTreeMap<SyncableId, Value>> {
        self.compounds.get(subject).map(CompoundSubject::resources)
    }

    pub fn subscription_state(&self, subject: &str) -> Option<SubscriptionState> {
        self.subjects.get(subject).map(|s| s.state)
    }

    /// Id of the current subscription attempt of a subject.
    pub fn subscription_id(&self, subject: &str) -> Option<SubscriptionId> {
        self.subjects.get(subject)?.subscription
    }

    /// Whether a syncable or compound subject has loaded.
    pub fn is_ready(&self, subject: &str) -> bool {
        self.subjects
            .get(subject)
            .map(|s| s.ready)
            .or_else(|| self.compounds.get(subject).map(CompoundSubject::is_ready))
            .unwrap_or(false)
    }

    /// True while any locally issued change awaits confirmation.
    pub fn syncing(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Number of unconfirmed local changes queued on a resource.
    pub fn pending_changes(&self, subject: &str, id: &SyncableId) -> usize {
        self.subjects
            .get(subject)
            .map_or(0, |s| s.pending_changes(id))
    }

    pub fn drain_outbound(&mut self) -> Vec<ClientEvent> {
        self.outbound.drain(..).collect()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    // ── Inbound events ───────────────────────────────────────────

    /// Applies an event received from the server.
    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::Reconnect => {
                info!("reconnected, resubscribing");
                self.subscribe();
            }
            ServerEvent::Subscribed {
                subscription,
                subject,
            } => self.handle_subscribed(subscription, &subject),
            ServerEvent::Change(change) => {
                self.in_flight.remove(&change.id);
                if self.accepts_events(&change.subject) {
                    self.handle_broadcast(change, now);
                }
            }
            ServerEvent::Snapshots {
                subject,
                snapshots,
                timestamp,
            } => {
                if self.accepts_events(&subject) {
                    self.handle_snapshots(&subject, snapshots, timestamp, now);
                }
            }
        }
    }

    fn handle_subscribed(&mut self, subscription: SubscriptionId, name: &str) {
        let Some(subject) = self.subjects.get_mut(name) else {
            warn!(subject = %name, "acknowledgement for unknown subject");
            return;
        };

        if subject.subscription != Some(subscription) {
            warn!(subject = %name, %subscription, "ignoring stale subscription acknowledgement");
            return;
        }

        subject.state = SubscriptionState::Subscribed;
        info!(subject = %name, %subscription, "subscribed");
    }

    fn accepts_events(&self, name: &str) -> bool {
        match self.subjects.get(name) {
            Some(subject) if subject.state == SubscriptionState::Subscribed => true,
            Some(_) => {
                warn!(subject = %name, "dropping event received before subscription");
                false
            }
            None => {
                warn!(subject = %name, "dropping event for unknown subject");
                false
            }
        }
    }

    fn handle_broadcast(&mut self, change: Change, now: Instant) {
        let name = change.subject.clone();
        let id = change.resource.clone();
        let Some(subject) = self.subjects.get_mut(&name) else {
            return;
        };

        if let Some(timestamp) = change.timestamp {
            subject.timestamp = Some(timestamp);
        }

        if change.is_removal() {
            subject.data.remove(&id);
            let previous = subject.resources.remove(&id);
            self.in_flight
                .retain(|_, f| !(f.subject == name && f.resource == id));

            if previous.is_some() {
                self.emit_change(&name, &id, previous, None, now);
            }
            return;
        }

        let confirmed = |snapshot: Resource| snapshot.with_syncing(false);
        // Values rebuilt locally carry the broadcast clock.
        let stamp = change.timestamp;
        let rebuilt = |snapshot: Resource| match stamp {
            Some(timestamp) => snapshot.with_timestamp(timestamp),
            None => snapshot,
        };

        if change.is_creation() {
            let snapshot = confirmed(
                change
                    .snapshot
                    .clone()
                    .unwrap_or_else(|| rebuilt(subject.definition.create(&change))),
            );
            match subject.data.get_mut(&id) {
                Some(data) => {
                    data.confirm_head(&change.id);
                    data.snapshot = Some(snapshot);
                }
                None => {
                    subject.data.insert(id.clone(), ResourceData::confirmed(snapshot));
                }
            }
        } else {
            match subject.data.get_mut(&id) {
                Some(data) => {
                    data.confirm_head(&change.id);
                    let snapshot = match (&change.snapshot, &data.snapshot) {
                        (Some(snapshot), _) => Some(snapshot.clone()),
                        (None, Some(current)) => Some(rebuilt(subject.definition.update(current, &change))),
                        (None, None) => None,
                    };
                    data.snapshot = snapshot.map(confirmed);
                }
                None => match &change.snapshot {
                    Some(snapshot) => {
                        subject
                            .data
                            .insert(id.clone(), ResourceData::confirmed(confirmed(snapshot.clone())));
                    }
                    None => {
                        debug!(subject = %name, resource = %id, "ignoring update of unknown resource");
                        return;
                    }
                },
            }
        }

        if let Some((before, after)) = subject.refresh(&id) {
            self.emit_change(&name, &id, before, after, now);
        } else {
            debug!(subject = %name, resource = %id, change = %change.id, "broadcast left resource unchanged");
        }
    }

    fn handle_snapshots(&mut self, name: &str, snapshots: Vec<Resource>, timestamp: u64, now: Instant) {
        let Some(subject) = self.subjects.get_mut(name) else {
            return;
        };

        let initial = !subject.ready;
        let mut changed = Vec::new();

        for snapshot in snapshots {
            let id = snapshot.id.clone();
            let snapshot = snapshot.with_syncing(false);
            match subject.data.get_mut(&id) {
                Some(data) => data.snapshot = Some(snapshot),
                None => {
                    subject.data.insert(id.clone(), ResourceData::confirmed(snapshot));
                }
            }

            if let Some((before, after)) = subject.refresh(&id) {
                changed.push((id, before, after));
            }
        }

        subject.timestamp = Some(timestamp);

        if initial {
            subject.ready = true;
            info!(subject = %name, resources = subject.resources.len(), "subject ready");
            self.notifications.push_back(Notification::Ready {
                subject: name.to_string(),
            });
            self.notify_compounds_ready(name, now);
        } else {
            for (id, before, after) in changed {
                self.emit_change(name, &id, before, after, now);
            }
        }
    }

    // ── Local operations ─────────────────────────────────────────

    /// Creates a resource optimistically and sends the creation.
    pub fn create(&mut self, creation: RawCreation, now: Instant) -> ClientResult<Resource> {
        let name = creation.subject;
        let subject = self
            .subjects
            .get_mut(&name)
            .ok_or_else(|| ClientError::UnknownSubject(name.clone()))?;

        let id = SyncableId::new();
        let mut change = Change::new(name.clone(), id.clone(), CREATE).with_options(creation.options);
        subject.definition.preprocess_change(&mut change);

        let object = subject.definition.create(&change).with_syncing(true);
        if !subject.definition.test_visibility(&object) {
            return Err(ClientError::InvisibleCreation {
                subject: name,
                resource: id,
            });
        }

        subject.data.insert(
            id.clone(),
            ResourceData {
                snapshot: None,
                changes: VecDeque::from([change.clone()]),
            },
        );
        subject.resources.insert(id.clone(), object.clone());

        self.emit_change(&name, &id, None, Some(object.clone()), now);
        self.send_change(change, now);
        Ok(object)
    }

    /// Sends a creation without applying it locally; the resource appears
    /// once the server broadcasts it.
    pub fn create_on_server(&mut self, creation: RawCreation, now: Instant) -> ClientResult<ChangePacketId> {
        let subject = self
            .subjects
            .get(&creation.subject)
            .ok_or_else(|| ClientError::UnknownSubject(creation.subject.clone()))?;

        let mut change = Change::new(creation.subject, SyncableId::new(), CREATE)
            .with_options(creation.options);
        subject.definition.preprocess_change(&mut change);

        let id = change.id;
        self.send_change(change, now);
        Ok(id)
    }

    /// Applies an update optimistically and sends it.
    ///
    /// Returns `None` when the update leaves the resource unchanged; nothing
    /// is queued or sent in that case.
    pub fn update(&mut self, raw: RawChange, now: Instant) -> ClientResult<Option<ChangePacketId>> {
        let name = raw.subject.clone();
        let subject = self
            .subjects
            .get_mut(&name)
            .ok_or_else(|| ClientError::UnknownSubject(name.clone()))?;

        let id = raw.resource.clone();
        let (Some(current), Some(data)) = (subject.resources.get(&id), subject.data.get_mut(&id)) else {
            return Err(ClientError::ResourceNotFound {
                subject: name,
                resource: id,
            });
        };

        let mut change = Change::new(name.clone(), id.clone(), raw.change_type).with_options(raw.options);
        subject.definition.preprocess_change(&mut change);

        let object = subject.definition.update(current, &change).with_syncing(true);
        if object == current.clone().with_syncing(true) {
            debug!(subject = %name, resource = %id, "update is a no-op");
            return Ok(None);
        }

        data.changes.push_back(change.clone());

        let before = if subject.definition.test_visibility(&object) {
            subject.resources.insert(id.clone(), object.clone())
        } else {
            debug!(subject = %name, resource = %id, "resource no longer visible");
            subject.resources.remove(&id)
        };
        let after = subject.resources.get(&id).cloned();

        let change_id = change.id;
        self.emit_change(&name, &id, before, after, now);
        self.send_change(change, now);
        Ok(Some(change_id))
    }

    /// Removes a resource optimistically and sends the removal.
    pub fn remove(&mut self, name: &str, id: &SyncableId, now: Instant) -> ClientResult<ChangePacketId> {
        let subject = self
            .subjects
            .get_mut(name)
            .ok_or_else(|| ClientError::UnknownSubject(name.to_string()))?;

        let (Some(previous), Some(data)) = (subject.resources.remove(id), subject.data.get_mut(id)) else {
            return Err(ClientError::ResourceNotFound {
                subject: name.to_string(),
                resource: id.clone(),
            });
        };

        let mut change = Change::new(name, id.clone(), REMOVE);
        subject.definition.preprocess_change(&mut change);
        data.changes.push_back(change.clone());

        let change_id = change.id;
        self.emit_change(name, id, Some(previous), None, now);
        self.send_change(change, now);
        Ok(change_id)
    }

    /// Asks the server for resources of a subject. Requests made within the
    /// coalescing window are sent together, one per subject.
    pub fn request(
        &mut self,
        subject: &str,
        resources: impl IntoIterator<Item = SyncableId>,
        now: Instant,
    ) -> ClientResult<()> {
        if !self.subjects.contains_key(subject) {
            return Err(ClientError::UnknownSubject(subject.to_string()));
        }

        let resources: Vec<SyncableId> = resources.into_iter().collect();
        if resources.is_empty() {
            return Ok(());
        }

        let deadline = now + self.config.request_delay();
        let pending = self.pending_requests.get_or_insert_with(|| PendingRequests {
            deadline,
            resources: BTreeMap::new(),
        });

        pending
            .resources
            .entry(subject.to_string())
            .or_default()
            .extend(resources);
        Ok(())
    }

    // ── Timers ───────────────────────────────────────────────────

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.config.confirmation_timeout();
        let expiry = self.in_flight.values().map(|f| f.sent_at + timeout).min();
        let flush = self.pending_requests.as_ref().map(|p| p.deadline);

        match (flush, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Flushes due requests and expires local changes left unconfirmed past
    /// the confirmation timeout.
    pub fn poll_timers(&mut self, now: Instant) {
        if self
            .pending_requests
            .as_ref()
            .is_some_and(|p| p.deadline <= now)
        {
            if let Some(pending) = self.pending_requests.take() {
                for (subject, resources) in pending.resources {
                    debug!(subject = %subject, count = resources.len(), "flushing request");
                    self.outbound.push_back(ClientEvent::Request(Request {
                        subject,
                        resources: resources.into_iter().collect(),
                    }));
                }
            }
        }

        let timeout = self.config.confirmation_timeout();
        let mut expired: Vec<(ChangePacketId, InFlight)> = self
            .in_flight
            .iter()
            .filter(|(_, f)| now.duration_since(f.sent_at) >= timeout)
            .map(|(id, f)| (*id, f.clone()))
            .collect();
        expired.sort_by_key(|(_, f)| f.sent_at);

        for (change_id, in_flight) in expired {
            self.in_flight.remove(&change_id);
            self.expire(change_id, in_flight, now);
        }
    }

    fn expire(&mut self, change_id: ChangePacketId, in_flight: InFlight, now: Instant) {
        let InFlight {
            subject: name,
            resource: id,
            ..
        } = in_flight;
        warn!(subject = %name, resource = %id, change = %change_id, "change not confirmed in time, rolling back");

        if let Some(subject) = self.subjects.get_mut(&name) {
            if let Some(data) = subject.data.get_mut(&id) {
                data.discard(&change_id);
                if data.is_vacant() {
                    subject.data.remove(&id);
                }
            }

            if let Some((before, after)) = subject.refresh(&id) {
                self.emit_change(&name, &id, before, after, now);
            }
        }

        self.notifications.push_back(Notification::Expired {
            subject: name,
            change_id,
        });
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn send_change(&mut self, change: Change, now: Instant) {
        self.in_flight.insert(
            change.id,
            InFlight {
                subject: change.subject.clone(),
                resource: change.resource.clone(),
                sent_at: now,
            },
        );
        self.outbound.push_back(ClientEvent::Change(change));
    }

    fn emit_change(
        &mut self,
        subject: &str,
        id: &SyncableId,
        before: Option<Resource>,
        after: Option<Resource>,
        now: Instant,
    ) {
        let notification = ChangeNotification {
            subject: subject.to_string(),
            resource: id.clone(),
            snapshot: before,
            object: after,
        };

        self.notifications
            .push_back(Notification::ResourceChange(notification.clone()));

        for compound in self.dependent_compounds(subject) {
            let Some(compound_subject) = self.compounds.get_mut(&compound) else {
                continue;
            };
            let effects = compound_subject.handle_dependency_change(&notification, &self.subjects);
            self.absorb(&compound, effects, now);
        }
    }

    fn notify_compounds_ready(&mut self, subject: &str, now: Instant) {
        for compound in self.dependent_compounds(subject) {
            let Some(compound_subject) = self.compounds.get_mut(&compound) else {
                continue;
            };
            let effects = compound_subject.handle_dependency_ready(subject, &self.subjects);
            self.absorb(&compound, effects, now);
        }
    }

    fn dependent_compounds(&self, subject: &str) -> Vec<String> {
        self.dependents
            .get(subject)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn absorb(&mut self, compound: &str, effects: CompoundEffects, now: Instant) {
        let CompoundEffects {
            notifications,
            absent,
        } = effects;
        self.notifications.extend(notifications);

        if absent.is_empty() {
            return;
        }

        let Some(entry) = self
            .compounds
            .get(compound)
            .map(|c| c.definition().entry().to_string())
        else {
            return;
        };
        debug!(compound = %compound, subject = %entry, count = absent.len(), "requesting absent entries");
        if let Err(error) = self.request(&entry, absent, now) {
            warn!(compound = %compound, %error, "failed to request absent entries");
        }
    }
}
