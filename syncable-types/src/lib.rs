//! Core type definitions for the syncable engine.
//!
//! This crate defines the plain data model shared by the server-side change
//! plant and the client reconciliation engine:
//! - Syncable and change packet identifiers
//! - Wall-clock timestamps and the server logical clock
//! - [`Syncable`] records, [`SyncableRef`] pointers and creation refs
//! - Access control entries and rights
//! - [`ChangePacket`], the unit of mutation requests
//!
//! Behaviour (access resolution, diffing, reconciliation) lives in
//! `syncable-core` and `syncable-client`; everything here is data.

mod access;
mod change;
mod ids;
mod syncable;
mod timestamp;

pub use access::{
    ACCESS_RIGHTS, AccessControlEntry, AccessControlEntryType, AccessRight, OneOrMany,
    SecuringAccessControlEntry, SecuringMatch,
};
pub use change::ChangePacket;
pub use ids::{ChangePacketId, SyncableId};
pub use syncable::{
    GeneralSyncableRef, IDENTITY_FIELDS, RESERVED_FIELD_PREFIX, STAMPED_FIELDS, Syncable,
    SyncableAssociation, SyncableCreationRef, SyncableCreationTarget, SyncableExtension,
    SyncableRef, is_reserved_field, syncable_key,
};
pub use timestamp::{LogicalClock, Timestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
