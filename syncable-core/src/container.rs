//! In-memory index from syncable reference to live syncable.
//!
//! The container exclusively owns the canonical value of every syncable it
//! holds. [`SyncableObject`] is a borrowed view over one of those values that
//! can follow associations back through the container; it never owns or
//! mutates the value.

use crate::error::{CoreError, CoreResult};
use crate::schema::{SchemaRegistry, SyncableSchema};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use syncable_types::{
    AccessControlEntry, SecuringAccessControlEntry, Syncable, SyncableId, SyncableRef,
};
use tracing::debug;

/// Owned table of live syncables keyed by `type:id`.
#[derive(Debug, Clone)]
pub struct SyncableContainer {
    schemas: Arc<SchemaRegistry>,
    syncables: HashMap<String, Syncable>,
}

impl SyncableContainer {
    /// Creates an empty container using the given schemas.
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            schemas,
            syncables: HashMap::new(),
        }
    }

    /// Creates a container pre-populated with `syncables`.
    pub fn with_syncables(
        schemas: Arc<SchemaRegistry>,
        syncables: impl IntoIterator<Item = Syncable>,
    ) -> Self {
        let mut container = Self::new(schemas);
        for syncable in syncables {
            container.add_syncable(syncable);
        }
        container
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Looks up a syncable object, returning `None` if absent.
    pub fn get_syncable_object(&self, reference: &SyncableRef) -> Option<SyncableObject<'_>> {
        self.syncables
            .get(&reference.key())
            .map(|syncable| SyncableObject::new(syncable, self))
    }

    /// Looks up a syncable object, failing with `NotFound` if absent.
    pub fn require_syncable_object(&self, reference: &SyncableRef) -> CoreResult<SyncableObject<'_>> {
        self.get_syncable_object(reference)
            .ok_or_else(|| CoreError::not_found(reference))
    }

    /// Returns the live syncable value.
    pub fn get_syncable(&self, reference: &SyncableRef) -> Option<&Syncable> {
        self.syncables.get(&reference.key())
    }

    pub fn contains(&self, reference: &SyncableRef) -> bool {
        self.syncables.contains_key(&reference.key())
    }

    /// Returns all syncables, optionally restricted to one type.
    pub fn syncables<'a>(&'a self, syncable_type: Option<&'a str>) -> impl Iterator<Item = &'a Syncable> {
        self.syncables
            .values()
            .filter(move |syncable| syncable_type.is_none_or(|t| syncable.syncable_type == t))
    }

    pub fn len(&self) -> usize {
        self.syncables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syncables.is_empty()
    }

    // ── Apply side ───────────────────────────────────────────────

    /// Inserts or replaces a syncable.
    pub fn add_syncable(&mut self, syncable: Syncable) {
        debug!("Container add {}", syncable.key());
        self.syncables.insert(syncable.key(), syncable);
    }

    /// Removes a syncable, returning it if it was present.
    pub fn remove_syncable(&mut self, reference: &SyncableRef) -> Option<Syncable> {
        debug!("Container remove {}", reference);
        self.syncables.remove(&reference.key())
    }
}

/// A borrowed view of one live syncable plus the container it was resolved
/// from, used to follow extensions and associations.
#[derive(Clone, Copy)]
pub struct SyncableObject<'a> {
    syncable: &'a Syncable,
    container: &'a SyncableContainer,
}

impl<'a> SyncableObject<'a> {
    pub fn new(syncable: &'a Syncable, container: &'a SyncableContainer) -> Self {
        Self {
            syncable,
            container,
        }
    }

    pub fn syncable(&self) -> &'a Syncable {
        self.syncable
    }

    pub fn container(&self) -> &'a SyncableContainer {
        self.container
    }

    pub fn id(&self) -> &'a SyncableId {
        &self.syncable.id
    }

    pub fn syncable_type(&self) -> &'a str {
        &self.syncable.syncable_type
    }

    pub fn reference(&self) -> SyncableRef {
        self.syncable.reference()
    }

    pub fn key(&self) -> String {
        self.syncable.key()
    }

    pub fn schema(&self) -> &'a SyncableSchema {
        self.container.schemas().schema(&self.syncable.syncable_type)
    }

    /// Resolves another object through the same container.
    pub fn require(&self, reference: &SyncableRef) -> CoreResult<SyncableObject<'a>> {
        self.container.require_syncable_object(reference)
    }

    pub fn get(&self, reference: &SyncableRef) -> Option<SyncableObject<'a>> {
        self.container.get_syncable_object(reference)
    }

    /// Fields whose mutation could alter rights granted to others.
    pub fn securing_field_names(&self) -> &'a [String] {
        &self.schema().securing_fields
    }

    /// Effective ACL: the extended object's entries (when `_extends.acl` is
    /// set), then the type's default entries, then the object's own `_acl`.
    /// Entries are keyed by name; a later entry replaces an earlier one in
    /// place.
    pub fn acl(&self) -> CoreResult<Vec<AccessControlEntry>> {
        let mut entries: Vec<AccessControlEntry> = Vec::new();

        if let Some(extension) = self.syncable.extends.as_ref().filter(|e| e.acl) {
            let extended = self.require(&extension.target)?;
            merge_by_name(&mut entries, extended.syncable.acl.iter().cloned(), |e| &e.name);
        }

        merge_by_name(&mut entries, self.schema().default_acl.iter().cloned(), |e| &e.name);

        merge_by_name(&mut entries, self.syncable.acl.iter().cloned(), |e| &e.name);

        Ok(entries)
    }

    /// Securing entries this object extends onto objects associating it,
    /// including those inherited through `_extends.secures`.
    pub fn securing_acl(&self) -> CoreResult<Vec<SecuringAccessControlEntry>> {
        let mut entries: Vec<SecuringAccessControlEntry> = Vec::new();

        if let Some(extension) = self.syncable.extends.as_ref().filter(|e| e.secures) {
            let extended = self.require(&extension.target)?;
            merge_by_name(&mut entries, extended.securing_acl()?, |e| &e.entry.name);
        }

        merge_by_name(&mut entries, self.syncable.secures.iter().cloned(), |e| &e.entry.name);

        Ok(entries)
    }

    /// Objects this one is associated with. Missing targets of requisite
    /// associations fail with `NotFound`; other missing targets are skipped.
    pub fn associated_objects(&self, securing_only: bool) -> CoreResult<Vec<SyncableObject<'a>>> {
        let mut objects = Vec::new();

        for association in &self.syncable.associations {
            if securing_only && !association.secures {
                continue;
            }

            match self.get(&association.target) {
                Some(object) => objects.push(object),
                None if association.requisite => {
                    return Err(CoreError::not_found(&association.target));
                }
                None => {
                    debug!(
                        "Skipping absent association {} of {}",
                        association.target,
                        self.key()
                    );
                }
            }
        }

        Ok(objects)
    }
}

impl fmt::Debug for SyncableObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SyncableObject").field(&self.key()).finish()
    }
}

fn merge_by_name<T>(
    entries: &mut Vec<T>,
    incoming: impl IntoIterator<Item = T>,
    name: impl Fn(&T) -> &String,
) {
    for entry in incoming {
        match entries.iter().position(|existing| name(existing) == name(&entry)) {
            Some(index) => entries[index] = entry,
            None => entries.push(entry),
        }
    }
}
