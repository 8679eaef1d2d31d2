//! Wire protocol between the client engine and the server.
//!
//! Inbound, the server sends [`ServerEvent`]s: subscription acknowledgements,
//! initial snapshots of a subject and broadcast changes. Outbound, the client
//! sends [`ClientEvent`]s: subscriptions, locally issued changes and batched
//! resource requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use syncable_types::{ChangePacketId, Syncable, SyncableId};
use uuid::Uuid;

/// Change type of creations.
pub const CREATE: &str = "create";

/// Change type of removals.
pub const REMOVE: &str = "remove";

/// A client-side replica of one syncable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: SyncableId,
    /// Server clock of the last confirmed state.
    #[serde(default)]
    pub timestamp: u64,
    /// A local change on this resource awaits confirmation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub syncing: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<SyncableId>) -> Self {
        Self {
            id: id.into(),
            timestamp: 0,
            syncing: false,
            fields: Map::new(),
        }
    }

    /// Projects a confirmed syncable into a resource stamped with its clock.
    pub fn from_syncable(syncable: &Syncable) -> Self {
        Self {
            id: syncable.id.clone(),
            timestamp: syncable.clock,
            syncing: false,
            fields: syncable.fields.clone(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_syncing(mut self, syncing: bool) -> Self {
        self.syncing = syncing;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }
}

/// A change on one resource, either issued locally or broadcast by the
/// server as a confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangePacketId,
    pub subject: String,
    pub resource: SyncableId,
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default)]
    pub options: Value,
    /// Confirmed state after the change; present on broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Resource>,
    /// Server clock of the broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Change {
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<SyncableId>,
        change_type: impl Into<String>,
    ) -> Self {
        Self {
            id: ChangePacketId::new(),
            subject: subject.into(),
            resource: resource.into(),
            change_type: change_type.into(),
            options: Value::Null,
            snapshot: None,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: ChangePacketId) -> Self {
        self.id = id;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_snapshot(mut self, snapshot: Resource) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_creation(&self) -> bool {
        self.change_type == CREATE
    }

    pub fn is_removal(&self) -> bool {
        self.change_type == REMOVE
    }
}

/// Data for a local creation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCreation {
    pub subject: String,
    pub options: Value,
}

impl RawCreation {
    pub fn new(subject: impl Into<String>, options: Value) -> Self {
        Self {
            subject: subject.into(),
            options,
        }
    }
}

/// Data for a local update.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub subject: String,
    pub resource: SyncableId,
    pub change_type: String,
    pub options: Value,
}

impl RawChange {
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<SyncableId>,
        change_type: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            resource: resource.into(),
            change_type: change_type.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Identifier of one subscription attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscription request for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub subject: String,
    /// Clock of the last state seen, when resubscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Resources already held, when resubscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<Vec<SyncableId>>,
    /// Subject-specific subscription parameters.
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

/// Batched request for resources of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub subject: String,
    pub resources: Vec<SyncableId>,
}

/// Events received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The connection was re-established.
    Reconnect,
    /// A subscription was acknowledged.
    Subscribed {
        subscription: SubscriptionId,
        subject: String,
    },
    /// A confirmed change.
    Change(Change),
    /// Initial state of a subject.
    Snapshots {
        subject: String,
        snapshots: Vec<Resource>,
        timestamp: u64,
    },
}

/// Events sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Subscribe(Subscription),
    Change(Change),
    Request(Request),
}
