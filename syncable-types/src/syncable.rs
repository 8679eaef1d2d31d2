//! Syncable records and the references that address them.
//!
//! A [`Syncable`] is a versioned domain record. Its bookkeeping fields are
//! serialized with a leading underscore (`_id`, `_type`, `_clock`, ...); every
//! other field is type-specific and kept in a flattened JSON map so change
//! processors can edit arbitrary data and the change plant can diff it
//! structurally.

use crate::access::{AccessControlEntry, SecuringAccessControlEntry};
use crate::ids::SyncableId;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix shared by every reserved (bookkeeping) field name.
pub const RESERVED_FIELD_PREFIX: char = '_';

/// Identity fields: immutable once the syncable exists.
pub const IDENTITY_FIELDS: [&str; 3] = ["_id", "_type", "_extends"];

/// Fields stamped by the change plant itself on every update.
pub const STAMPED_FIELDS: [&str; 2] = ["_clock", "_updatedAt"];

/// Returns true if `field` is a reserved bookkeeping field.
pub fn is_reserved_field(field: &str) -> bool {
    field.starts_with(RESERVED_FIELD_PREFIX)
}

/// Builds the canonical container key for a `(type, id)` pair.
pub fn syncable_key(syncable_type: &str, id: &SyncableId) -> String {
    format!("{syncable_type}:{id}")
}

/// A lightweight pointer to a syncable. Never an ownership relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncableRef {
    #[serde(rename = "type")]
    pub syncable_type: String,
    pub id: SyncableId,
}

impl SyncableRef {
    /// Creates a reference to the syncable `(syncable_type, id)`.
    pub fn new(syncable_type: impl Into<String>, id: impl Into<SyncableId>) -> Self {
        Self {
            syncable_type: syncable_type.into(),
            id: id.into(),
        }
    }

    /// Canonical container key for this reference.
    pub fn key(&self) -> String {
        syncable_key(&self.syncable_type, &self.id)
    }
}

impl fmt::Display for SyncableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.syncable_type, self.id)
    }
}

/// The id a creation ref reserves for the syncable it will create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncableCreationTarget {
    pub id: SyncableId,
}

/// Points at a syncable that does not exist yet.
///
/// Serialized as `{"type": ..., "create": {"id": ...}}` so it can never be
/// mistaken for a [`SyncableRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncableCreationRef {
    #[serde(rename = "type")]
    pub syncable_type: String,
    pub create: SyncableCreationTarget,
}

impl SyncableCreationRef {
    /// Reserves a fresh id for a syncable of `syncable_type`.
    pub fn new(syncable_type: impl Into<String>) -> Self {
        Self::with_id(syncable_type, SyncableId::new())
    }

    /// Creation ref with a caller-chosen id.
    pub fn with_id(syncable_type: impl Into<String>, id: impl Into<SyncableId>) -> Self {
        Self {
            syncable_type: syncable_type.into(),
            create: SyncableCreationTarget { id: id.into() },
        }
    }

    /// The ref the created syncable will be reachable under.
    pub fn target(&self) -> SyncableRef {
        SyncableRef::new(self.syncable_type.clone(), self.create.id.clone())
    }
}

/// Either an existing syncable or one to be created by the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneralSyncableRef {
    Creation(SyncableCreationRef),
    Existing(SyncableRef),
}

impl From<SyncableRef> for GeneralSyncableRef {
    fn from(value: SyncableRef) -> Self {
        Self::Existing(value)
    }
}

impl From<SyncableCreationRef> for GeneralSyncableRef {
    fn from(value: SyncableCreationRef) -> Self {
        Self::Creation(value)
    }
}

/// Inheritance link: lets a syncable reuse another syncable's ACL and/or
/// securing entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableExtension {
    #[serde(rename = "ref")]
    pub target: SyncableRef,
    #[serde(default)]
    pub acl: bool,
    #[serde(default)]
    pub secures: bool,
}

/// Association from one syncable to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableAssociation {
    #[serde(rename = "ref")]
    pub target: SyncableRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The association must resolve; a missing target is an error.
    #[serde(default)]
    pub requisite: bool,
    /// The associated object may extend rights onto this one.
    #[serde(default)]
    pub secures: bool,
}

impl SyncableAssociation {
    /// A plain, non-securing association.
    pub fn new(target: SyncableRef) -> Self {
        Self {
            target,
            name: None,
            requisite: false,
            secures: false,
        }
    }

    /// An association whose target secures this syncable.
    pub fn securing(target: SyncableRef) -> Self {
        Self {
            secures: true,
            ..Self::new(target)
        }
    }

    pub fn requisite(mut self) -> Self {
        self.requisite = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A versioned domain record replicated between server and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Syncable {
    #[serde(rename = "_id")]
    pub id: SyncableId,

    #[serde(rename = "_type")]
    pub syncable_type: String,

    /// Server-assigned logical clock; only ever increases.
    #[serde(rename = "_clock", default)]
    pub clock: u64,

    #[serde(rename = "_createdAt", default)]
    pub created_at: Timestamp,

    #[serde(rename = "_updatedAt", default)]
    pub updated_at: Timestamp,

    #[serde(rename = "_extends", default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<SyncableExtension>,

    #[serde(rename = "_associations", default, skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<SyncableAssociation>,

    /// Explicit access control list of this object.
    #[serde(rename = "_acl", default, skip_serializing_if = "Vec::is_empty")]
    pub acl: Vec<AccessControlEntry>,

    /// Entries this object grants to objects associating it.
    #[serde(rename = "_secures", default, skip_serializing_if = "Vec::is_empty")]
    pub secures: Vec<SecuringAccessControlEntry>,

    /// Type-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Syncable {
    /// Creates an empty syncable with the given identity.
    pub fn new(syncable_type: impl Into<String>, id: impl Into<SyncableId>) -> Self {
        Self {
            id: id.into(),
            syncable_type: syncable_type.into(),
            clock: 0,
            created_at: Timestamp::default(),
            updated_at: Timestamp::default(),
            extends: None,
            associations: Vec::new(),
            acl: Vec::new(),
            secures: Vec::new(),
            fields: Map::new(),
        }
    }

    /// Creates the syncable a creation ref reserved.
    pub fn from_creation_ref(creation: &SyncableCreationRef) -> Self {
        Self::new(creation.syncable_type.clone(), creation.create.id.clone())
    }

    /// Returns a reference addressing this syncable.
    pub fn reference(&self) -> SyncableRef {
        SyncableRef::new(self.syncable_type.clone(), self.id.clone())
    }

    /// Canonical container key.
    pub fn key(&self) -> String {
        syncable_key(&self.syncable_type, &self.id)
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_acl(mut self, entry: AccessControlEntry) -> Self {
        self.acl.push(entry);
        self
    }

    pub fn with_securing(mut self, entry: SecuringAccessControlEntry) -> Self {
        self.secures.push(entry);
        self
    }

    pub fn with_association(mut self, association: SyncableAssociation) -> Self {
        self.associations.push(association);
        self
    }

    pub fn with_extension(mut self, extension: SyncableExtension) -> Self {
        self.extends = Some(extension);
        self
    }

    /// Returns a type-specific field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a type-specific string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Sets a type-specific field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Removes a type-specific field, returning its previous value.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Serializes the syncable into its JSON representation.
    pub fn to_value(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a syncable from its JSON representation.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
