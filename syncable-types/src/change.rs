//! Change packets.
//!
//! A change packet is a typed, named mutation request: it references the
//! syncables it touches by name and carries free-form options for the
//! processor registered under its type.

use crate::ids::ChangePacketId;
use crate::syncable::{GeneralSyncableRef, SyncableCreationRef, SyncableRef};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A change request as sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePacket {
    pub id: ChangePacketId,

    /// Change type, used to look up the processor.
    #[serde(rename = "type")]
    pub change_type: String,

    /// Named references to the syncables this change touches.
    #[serde(default)]
    pub refs: BTreeMap<String, GeneralSyncableRef>,

    #[serde(default)]
    pub options: Value,

    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

impl ChangePacket {
    /// Creates a packet of the given type stamped with the current time.
    #[must_use]
    pub fn new(change_type: impl Into<String>) -> Self {
        Self {
            id: ChangePacketId::new(),
            change_type: change_type.into(),
            refs: BTreeMap::new(),
            options: Value::Null,
            created_at: Timestamp::now(),
        }
    }

    /// References an existing syncable under `name`.
    #[must_use]
    pub fn with_ref(mut self, name: impl Into<String>, reference: SyncableRef) -> Self {
        self.refs.insert(name.into(), reference.into());
        self
    }

    /// Reserves a syncable to be created under `name`.
    #[must_use]
    pub fn with_creation(mut self, name: impl Into<String>, creation: SyncableCreationRef) -> Self {
        self.refs.insert(name.into(), creation.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }
}
