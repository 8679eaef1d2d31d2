//! Notifications emitted by the client engine.

use serde::Serialize;
use serde_json::Value;
use syncable_types::{ChangePacketId, SyncableId};

use crate::protocol::Resource;

/// A displayed value changed: `snapshot` is the value before, `object` the
/// value after. `None` on either side marks an appearance or a removal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotification<T> {
    pub subject: String,
    pub resource: SyncableId,
    pub snapshot: Option<T>,
    pub object: Option<T>,
}

/// Everything the engine reports to its embedder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A syncable or compound subject loaded its initial state.
    Ready { subject: String },
    /// A resource of a syncable subject changed.
    ResourceChange(ChangeNotification<Resource>),
    /// A compound value changed.
    CompoundChange(ChangeNotification<Value>),
    /// A local change was not confirmed in time and has been rolled back.
    Expired {
        subject: String,
        change_id: ChangePacketId,
    },
}

impl Notification {
    /// Subject the notification belongs to.
    pub fn subject(&self) -> &str {
        match self {
            Self::Ready { subject } | Self::Expired { subject, .. } => subject,
            Self::ResourceChange(change) => &change.subject,
            Self::CompoundChange(change) => &change.subject,
        }
    }
}
