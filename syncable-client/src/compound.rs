//! Compound views: values derived from an entry resource and the resources
//! of other subjects it depends on.
//!
//! A compound subject is materialized once every dependency subject has
//! loaded. After that, each dependency change updates the dependency's
//! indexes, resolves the affected entries and rebuilds their compounds,
//! emitting a notification only when a compound value actually changed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use syncable_types::SyncableId;
use tracing::debug;

use crate::notification::{ChangeNotification, Notification};
use crate::protocol::Resource;
use crate::state::SyncableSubject;

/// Builds the compound value of an entry; `None` leaves the entry without a
/// compound.
pub type CompoundBuilder =
    Arc<dyn Fn(&Resource, &CompoundDependencyHost<'_>) -> Option<Value> + Send + Sync>;

/// Maps a dependency resource to the entries it contributes to.
pub type EntryResolver =
    Arc<dyn Fn(&Resource, &CompoundDependencyHost<'_>) -> EntryResolution + Send + Sync>;

/// Outcome of resolving a dependency resource to entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryResolution {
    /// The loaded entries affected (possibly none).
    Resolved(Vec<SyncableId>),
    /// The entry is known by id but not loaded yet.
    Absent(SyncableId),
}

impl EntryResolution {
    pub fn none() -> Self {
        Self::Resolved(Vec::new())
    }

    pub fn one(id: SyncableId) -> Self {
        Self::Resolved(vec![id])
    }
}

/// A subject a compound depends on.
#[derive(Clone)]
pub struct Dependency {
    pub subject: String,
    /// Field names indexed for lookups through the dependency host.
    pub indexes: Vec<String>,
    /// Request absent entries reported by the resolver once the compound
    /// becomes ready.
    pub request_absent_entries: bool,
    pub resolver: EntryResolver,
}

impl Dependency {
    pub fn new(
        subject: impl Into<String>,
        resolver: impl Fn(&Resource, &CompoundDependencyHost<'_>) -> EntryResolution
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            subject: subject.into(),
            indexes: Vec::new(),
            request_absent_entries: false,
            resolver: Arc::new(resolver),
        }
    }

    pub fn with_index(mut self, key: impl Into<String>) -> Self {
        self.indexes.push(key.into());
        self
    }

    pub fn requesting_absent_entries(mut self) -> Self {
        self.request_absent_entries = true;
        self
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("subject", &self.subject)
            .field("indexes", &self.indexes)
            .field("request_absent_entries", &self.request_absent_entries)
            .finish_non_exhaustive()
    }
}

/// Declaration of a compound subject.
///
/// The entry subject is always the first dependency and resolves every
/// resource to itself.
#[derive(Clone)]
pub struct CompoundDefinition {
    entry: String,
    dependencies: Vec<Dependency>,
    builder: CompoundBuilder,
}

impl CompoundDefinition {
    pub fn new(
        entry: impl Into<String>,
        builder: impl Fn(&Resource, &CompoundDependencyHost<'_>) -> Option<Value>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let entry = entry.into();
        let identity = Dependency::new(entry.clone(), |resource: &Resource, _: &CompoundDependencyHost<'_>| {
            EntryResolution::one(resource.id.clone())
        });

        Self {
            entry,
            dependencies: vec![identity],
            builder: Arc::new(builder),
        }
    }

    pub fn with_entry_index(mut self, key: impl Into<String>) -> Self {
        if let Some(entry) = self.dependencies.first_mut() {
            entry.indexes.push(key.into());
        }
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    fn dependency(&self, subject: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.subject == subject)
    }
}

impl fmt::Debug for CompoundDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundDefinition")
            .field("entry", &self.entry)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

// ── Indexes ─────────────────────────────────────────────────────

/// Index key -> serialized field value -> resource ids.
type ResourceIndex = HashMap<String, HashMap<String, BTreeSet<SyncableId>>>;

/// Falsy values (null, false, zero, empty string) are never indexed.
fn index_value(resource: &Resource, key: &str) -> Option<String> {
    let value = resource.get(key)?;
    let indexed = match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    };
    indexed.then(|| value.to_string())
}

fn index_insert(index: &mut ResourceIndex, keys: &[String], resource: &Resource) {
    for key in keys {
        if let Some(value) = index_value(resource, key) {
            index
                .entry(key.clone())
                .or_default()
                .entry(value)
                .or_default()
                .insert(resource.id.clone());
        }
    }
}

fn index_remove(index: &mut ResourceIndex, keys: &[String], resource: &Resource) {
    for key in keys {
        let Some(value) = index_value(resource, key) else {
            continue;
        };
        if let Some(values) = index.get_mut(key) {
            if let Some(ids) = values.get_mut(&value) {
                ids.remove(&resource.id);
                if ids.is_empty() {
                    values.remove(&value);
                }
            }
        }
    }
}

// ── Dependency host ─────────────────────────────────────────────

/// Read access to the dependency subjects of a compound, handed to builders
/// and resolvers.
pub struct CompoundDependencyHost<'a> {
    subjects: &'a BTreeMap<String, SyncableSubject>,
    indexes: &'a HashMap<String, ResourceIndex>,
}

impl<'a> CompoundDependencyHost<'a> {
    pub fn resource(&self, subject: &str, id: &SyncableId) -> Option<&'a Resource> {
        self.subjects.get(subject)?.resources.get(id)
    }

    /// All displayed resources of a subject, in id order.
    pub fn resources(&self, subject: &str) -> Vec<&'a Resource> {
        self.subjects
            .get(subject)
            .map(|s| s.resources.values().collect())
            .unwrap_or_default()
    }

    /// Resources whose indexed field `key` equals `value`, oldest first.
    pub fn resources_by_index(&self, subject: &str, key: &str, value: &Value) -> Vec<&'a Resource> {
        let Some(ids) = self
            .indexes
            .get(subject)
            .and_then(|index| index.get(key))
            .and_then(|values| values.get(&value.to_string()))
        else {
            return Vec::new();
        };

        let mut resources: Vec<&'a Resource> = ids
            .iter()
            .filter_map(|id| self.resource(subject, id))
            .collect();
        resources.sort_by_key(|resource| resource.timestamp);
        resources
    }

    pub fn resource_by_index(&self, subject: &str, key: &str, value: &Value) -> Option<&'a Resource> {
        self.resources_by_index(subject, key, value).into_iter().next()
    }
}

// ── Compound subject ────────────────────────────────────────────

/// Side effects of a compound update for the engine to carry out.
#[derive(Debug, Default)]
pub(crate) struct CompoundEffects {
    pub notifications: Vec<Notification>,
    /// Entry ids to request from the server.
    pub absent: BTreeSet<SyncableId>,
}

/// A registered compound subject.
pub(crate) struct CompoundSubject {
    name: String,
    definition: CompoundDefinition,
    /// Dependency subjects that have not loaded yet.
    pending: BTreeSet<String>,
    ready: bool,
    indexes: HashMap<String, ResourceIndex>,
    resources: BTreeMap<SyncableId, Value>,
}

impl CompoundSubject {
    pub fn new(name: impl Into<String>, definition: CompoundDefinition) -> Self {
        let pending = definition
            .dependencies
            .iter()
            .map(|d| d.subject.clone())
            .collect();

        Self {
            name: name.into(),
            definition,
            pending,
            ready: false,
            indexes: HashMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn definition(&self) -> &CompoundDefinition {
        &self.definition
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn resources(&self) -> &BTreeMap<SyncableId, Value> {
        &self.resources
    }

    /// A dependency subject loaded its initial state.
    pub fn handle_dependency_ready(
        &mut self,
        subject: &str,
        subjects: &BTreeMap<String, SyncableSubject>,
    ) -> CompoundEffects {
        let mut effects = CompoundEffects::default();

        let Self {
            name,
            definition,
            pending,
            ready,
            indexes,
            resources,
        } = self;

        indexes.clear();
        for dependency in &definition.dependencies {
            let index = indexes.entry(dependency.subject.clone()).or_default();
            if let Some(loaded) = subjects.get(&dependency.subject) {
                for resource in loaded.resources.values() {
                    index_insert(index, &dependency.indexes, resource);
                }
            }
        }

        pending.remove(subject);
        if !pending.is_empty() || *ready {
            return effects;
        }

        let host = CompoundDependencyHost { subjects, indexes };

        for entry in host.resources(&definition.entry) {
            if let Some(compound) = (definition.builder)(entry, &host) {
                resources.insert(entry.id.clone(), compound);
            }
        }

        for dependency in &definition.dependencies[1..] {
            if !dependency.request_absent_entries {
                continue;
            }
            for resource in host.resources(&dependency.subject) {
                if let EntryResolution::Absent(id) = (dependency.resolver)(resource, &host) {
                    effects.absent.insert(id);
                }
            }
        }

        *ready = true;
        debug!(compound = %name, entries = resources.len(), "compound ready");
        effects.notifications.push(Notification::Ready {
            subject: name.clone(),
        });

        effects
    }

    /// A resource of a dependency subject changed.
    pub fn handle_dependency_change(
        &mut self,
        change: &ChangeNotification<Resource>,
        subjects: &BTreeMap<String, SyncableSubject>,
    ) -> CompoundEffects {
        let mut effects = CompoundEffects::default();

        if !self.pending.is_empty() {
            return effects;
        }

        let Self {
            name,
            definition,
            indexes,
            resources,
            ..
        } = self;

        let Some(dependency) = definition.dependency(&change.subject) else {
            return effects;
        };

        let index = indexes.entry(change.subject.clone()).or_default();
        if let Some(before) = &change.snapshot {
            index_remove(index, &dependency.indexes, before);
        }
        if let Some(after) = &change.object {
            index_insert(index, &dependency.indexes, after);
        }

        let host = CompoundDependencyHost { subjects, indexes };
        let mut rebuild = |id: &SyncableId, effects: &mut CompoundEffects| {
            let compound = host
                .resource(&definition.entry, id)
                .and_then(|entry| (definition.builder)(entry, &host));
            let previous = resources.get(id);

            if previous == compound.as_ref() {
                return;
            }

            let previous = match &compound {
                Some(value) => resources.insert(id.clone(), value.clone()),
                None => resources.remove(id),
            };

            effects
                .notifications
                .push(Notification::CompoundChange(ChangeNotification {
                    subject: name.clone(),
                    resource: id.clone(),
                    snapshot: previous,
                    object: compound,
                }));
        };

        if change.subject == definition.entry {
            rebuild(&change.resource, &mut effects);
            return effects;
        }

        let previous = change
            .snapshot
            .as_ref()
            .map(|before| (dependency.resolver)(before, &host));
        let current = change
            .object
            .as_ref()
            .map(|after| (dependency.resolver)(after, &host));

        let mut resolved = Vec::new();
        match current {
            Some(EntryResolution::Absent(id)) => {
                effects.absent.insert(id);
            }
            Some(EntryResolution::Resolved(ids)) => resolved = ids,
            None => {}
        }

        for id in &resolved {
            rebuild(id, &mut effects);
        }

        if let Some(EntryResolution::Resolved(ids)) = previous {
            for id in ids.iter().filter(|id| !resolved.contains(id)) {
                rebuild(id, &mut effects);
            }
        }

        effects
    }
}
