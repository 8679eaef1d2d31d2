//! The change plant.
//!
//! A [`ChangePlant`] holds one processor per change type (the blueprint) and
//! runs a [`ChangePacket`] against a [`SyncableContainer`] as a single
//! all-or-nothing transaction:
//!
//! 1. Every existing ref is resolved and prepared (read access is checked
//!    and an isolated copy is made); creation refs pass through.
//! 2. The processor mutates the prepared copies through a [`ChangeSession`]
//!    and may create, remove and notify.
//! 3. Each surviving copy is diffed against the live value; identity changes
//!    are rejected and the rights required by the changed fields are
//!    validated.
//!
//! The container is only borrowed immutably: nothing is applied until the
//! caller hands the result to a
//! [`ContainerApplicator`](crate::ContainerApplicator).

use crate::access::AccessRightsOptions;
use crate::container::{SyncableContainer, SyncableObject};
use crate::context::{Context, Environment};
use crate::diff::{Diff, diff};
use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use syncable_types::{
    AccessRight, ChangePacket, ChangePacketId, GeneralSyncableRef, IDENTITY_FIELDS,
    STAMPED_FIELDS, Syncable, SyncableCreationRef, SyncableRef, Timestamp, is_reserved_field,
};
use tracing::debug;

/// One updated syncable in a processing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePlantUpdateItem {
    /// Records turning the previous value into `snapshot`.
    pub diffs: Vec<Diff>,
    pub snapshot: Syncable,
}

/// The complete, authoritative effect of one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePlantProcessingResult {
    pub id: ChangePacketId,
    /// Present on the authoritative path only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<u64>,
    pub creations: Vec<Syncable>,
    pub updates: Vec<ChangePlantUpdateItem>,
    pub removals: Vec<SyncableRef>,
    pub notifications: Vec<Value>,
}

impl ChangePlantProcessingResult {
    /// Returns true if the change has no effect on any syncable.
    pub fn is_empty(&self) -> bool {
        self.creations.is_empty() && self.updates.is_empty() && self.removals.is_empty()
    }
}

/// Handler for one change type.
pub trait ChangeProcessor: Send + Sync {
    fn process(&self, session: &mut ChangeSession<'_>) -> CoreResult<()>;
}

impl<F> ChangeProcessor for F
where
    F: Fn(&mut ChangeSession<'_>) -> CoreResult<()> + Send + Sync,
{
    fn process(&self, session: &mut ChangeSession<'_>) -> CoreResult<()> {
        self(session)
    }
}

struct BlueprintEntry {
    processor: Box<dyn ChangeProcessor>,
    dependency: Option<Value>,
}

/// Registry of change processors keyed by change type.
#[derive(Default)]
pub struct ChangePlant {
    blueprint: HashMap<String, BlueprintEntry>,
}

impl fmt::Debug for ChangePlant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.change_types().collect();
        types.sort_unstable();
        f.debug_struct("ChangePlant").field("change_types", &types).finish()
    }
}

impl ChangePlant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure processor for `change_type`.
    pub fn register<F>(&mut self, change_type: impl Into<String>, processor: F)
    where
        F: Fn(&mut ChangeSession<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.register_processor(change_type, processor, None);
    }

    /// Registers a processor together with its dependency-resolve options.
    pub fn register_processor(
        &mut self,
        change_type: impl Into<String>,
        processor: impl ChangeProcessor + 'static,
        dependency: Option<Value>,
    ) {
        self.blueprint.insert(
            change_type.into(),
            BlueprintEntry {
                processor: Box::new(processor),
                dependency,
            },
        );
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, change_type: impl Into<String>, processor: F) -> Self
    where
        F: Fn(&mut ChangeSession<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.register(change_type, processor);
        self
    }

    /// Dependency-resolve options registered for `change_type`.
    pub fn dependency_options(&self, change_type: &str) -> Option<&Value> {
        self.blueprint
            .get(change_type)
            .and_then(|entry| entry.dependency.as_ref())
    }

    pub fn change_types(&self) -> impl Iterator<Item = &str> {
        self.blueprint.keys().map(String::as_str)
    }

    /// Processes `packet` against `container`.
    ///
    /// When `clock` is given (authoritative path) creations and updates are
    /// stamped with it; otherwise the result carries no clock.
    pub fn process(
        &self,
        packet: &ChangePacket,
        context: &Context,
        container: &SyncableContainer,
        clock: Option<u64>,
    ) -> CoreResult<ChangePlantProcessingResult> {
        let entry = self
            .blueprint
            .get(&packet.change_type)
            .ok_or_else(|| CoreError::UnknownChangeType(packet.change_type.clone()))?;

        let now = match context.environment {
            Environment::Client => packet.created_at,
            Environment::Server => Timestamp::now(),
        };

        debug!(
            "Processing change {} of type {} ({} refs)",
            packet.id,
            packet.change_type,
            packet.refs.len()
        );

        let mut session = ChangeSession::new(packet, context, container, clock, now);

        for (name, reference) in &packet.refs {
            match reference {
                GeneralSyncableRef::Existing(reference) => {
                    let object = container.require_syncable_object(reference)?;
                    let index = session.prepare_object(object)?;
                    session.named.insert(name.clone(), index);
                }
                GeneralSyncableRef::Creation(creation) => {
                    session.creation_refs.insert(name.clone(), creation.clone());
                }
            }
        }

        entry.processor.process(&mut session)?;

        session.finish(packet.id)
    }
}

struct PreparedSyncable<'a> {
    object: SyncableObject<'a>,
    clone: Syncable,
}

/// Capabilities handed to a processor for the duration of one change.
pub struct ChangeSession<'a> {
    packet: &'a ChangePacket,
    context: &'a Context,
    container: &'a SyncableContainer,
    clock: Option<u64>,
    now: Timestamp,

    prepared: Vec<PreparedSyncable<'a>>,
    prepared_index: HashMap<String, usize>,
    named: BTreeMap<String, usize>,
    creation_refs: BTreeMap<String, SyncableCreationRef>,

    creations: Vec<Syncable>,
    removals: Vec<SyncableRef>,
    removed: HashSet<String>,
    notifications: Vec<Value>,
}

impl<'a> ChangeSession<'a> {
    fn new(
        packet: &'a ChangePacket,
        context: &'a Context,
        container: &'a SyncableContainer,
        clock: Option<u64>,
        now: Timestamp,
    ) -> Self {
        Self {
            packet,
            context,
            container,
            clock,
            now,
            prepared: Vec::new(),
            prepared_index: HashMap::new(),
            named: BTreeMap::new(),
            creation_refs: BTreeMap::new(),
            creations: Vec::new(),
            removals: Vec::new(),
            removed: HashSet::new(),
            notifications: Vec::new(),
        }
    }

    // ── Request data ─────────────────────────────────────────────

    pub fn options(&self) -> &'a Value {
        &self.packet.options
    }

    /// Deserializes the packet options into `T`.
    pub fn options_as<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(T::deserialize(&self.packet.options)?)
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn container(&self) -> &'a SyncableContainer {
        self.container
    }

    /// `now` for this change: the packet's `createdAt` on clients, the wall
    /// clock on the server.
    pub fn created_at(&self) -> Timestamp {
        self.now
    }

    pub fn clock(&self) -> Option<u64> {
        self.clock
    }

    // ── Named refs ───────────────────────────────────────────────

    fn named_index(&self, name: &str) -> CoreResult<usize> {
        self.named.get(name).copied().ok_or_else(|| {
            CoreError::InvalidOperation(format!(
                "change {} has no syncable ref named `{name}`",
                self.packet.change_type
            ))
        })
    }

    /// The prepared copy of the syncable referenced as `name`.
    pub fn syncable(&self, name: &str) -> CoreResult<&Syncable> {
        let index = self.named_index(name)?;
        Ok(&self.prepared[index].clone)
    }

    /// Mutable access to the prepared copy of the syncable referenced as `name`.
    pub fn syncable_mut(&mut self, name: &str) -> CoreResult<&mut Syncable> {
        let index = self.named_index(name)?;
        Ok(&mut self.prepared[index].clone)
    }

    /// The live object referenced as `name`. Never mutate through it; use
    /// [`syncable_mut`](Self::syncable_mut).
    pub fn object(&self, name: &str) -> CoreResult<SyncableObject<'a>> {
        let index = self.named_index(name)?;
        Ok(self.prepared[index].object)
    }

    /// The creation ref named `name`.
    pub fn creation_ref(&self, name: &str) -> CoreResult<&SyncableCreationRef> {
        self.creation_refs.get(name).ok_or_else(|| {
            CoreError::InvalidOperation(format!(
                "change {} has no creation ref named `{name}`",
                self.packet.change_type
            ))
        })
    }

    // ── Operations ───────────────────────────────────────────────

    /// Returns the isolated copy of `reference`, preparing it on first use.
    pub fn prepare(&mut self, reference: &SyncableRef) -> CoreResult<&mut Syncable> {
        let object = self.container.require_syncable_object(reference)?;
        let index = self.prepare_object(object)?;
        Ok(&mut self.prepared[index].clone)
    }

    fn prepare_object(&mut self, object: SyncableObject<'a>) -> CoreResult<usize> {
        let key = object.key();

        if let Some(index) = self.prepared_index.get(&key) {
            return Ok(*index);
        }

        object.validate_access_rights(
            &[AccessRight::Read],
            self.context,
            AccessRightsOptions::default(),
        )?;

        debug!("Preparing {}", key);

        self.prepared.push(PreparedSyncable {
            object,
            clone: object.syncable().clone(),
        });

        let index = self.prepared.len() - 1;
        self.prepared_index.insert(key, index);

        Ok(index)
    }

    /// Queues a creation, stamping its clock and timestamps.
    pub fn create(&mut self, mut syncable: Syncable) {
        if let Some(clock) = self.clock {
            syncable.clock = clock;
        }

        syncable.created_at = self.now;
        syncable.updated_at = self.now;

        debug!("Creating {}", syncable.key());

        self.creations.push(syncable);
    }

    /// Queues the removal of `reference`. Requires `full` rights.
    pub fn remove(&mut self, reference: &SyncableRef) -> CoreResult<()> {
        let object = self.container.require_syncable_object(reference)?;

        object.validate_access_rights(
            &[AccessRight::Full],
            self.context,
            AccessRightsOptions::default(),
        )?;

        if self.removed.insert(object.key()) {
            debug!("Removing {}", reference);
            self.removals.push(reference.clone());
        }

        Ok(())
    }

    /// Queues the removal of the syncable referenced as `name`.
    pub fn remove_named(&mut self, name: &str) -> CoreResult<()> {
        let reference = self.object(name)?.reference();
        self.remove(&reference)
    }

    /// Queues a notification for side-channel delivery.
    pub fn notify(&mut self, notification: Value) {
        self.notifications.push(notification);
    }

    // ── Completion ───────────────────────────────────────────────

    fn finish(self, id: ChangePacketId) -> CoreResult<ChangePlantProcessingResult> {
        let mut updates = Vec::new();

        for PreparedSyncable { object, mut clone } in self.prepared {
            let key = object.key();

            if self.removed.contains(&key) {
                continue;
            }

            if let Some(clock) = self.clock {
                clone.clock = clock;
            }
            clone.updated_at = self.now;

            let diffs = diff(
                &serde_json::to_value(object.syncable())?,
                &serde_json::to_value(&clone)?,
            );

            let changed: BTreeSet<&str> = diffs
                .iter()
                .filter_map(Diff::field)
                .filter(|field| !STAMPED_FIELDS.contains(field))
                .collect();

            if changed.is_empty() {
                debug!("No effective change on {}", key);
                continue;
            }

            if let Some(field) = changed.iter().find(|field| IDENTITY_FIELDS.contains(*field)) {
                return Err(CoreError::InvalidOperation(format!(
                    "identity field `{field}` of {key} cannot be changed"
                )));
            }

            let securing_fields = object.securing_field_names();

            let escalated = changed.iter().any(|field| {
                is_reserved_field(field) || securing_fields.iter().any(|s| s.as_str() == *field)
            });

            let required: &[AccessRight] = if escalated {
                &[AccessRight::Write, AccessRight::Full]
            } else {
                &[AccessRight::Write]
            };

            object.validate_access_rights(required, self.context, AccessRightsOptions::default())?;

            debug!("Updating {}: {:?}", key, changed);

            updates.push(ChangePlantUpdateItem {
                diffs,
                snapshot: clone,
            });
        }

        Ok(ChangePlantProcessingResult {
            id,
            clock: self.clock,
            creations: self.creations,
            updates,
            removals: self.removals,
            notifications: self.notifications,
        })
    }
}
