//! Identifier types used throughout the syncable engine.
//!
//! Generated identifiers use UUID v7 for time-ordered, globally unique values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a syncable, unique within its type namespace.
///
/// Syncable ids are opaque strings: generated ones are UUID v7 strings, but
/// applications may seed their own (e.g. `"task-1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncableId(String);

impl SyncableId {
    /// Creates a new, time-ordered syncable ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SyncableId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SyncableId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier for a change packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangePacketId(Uuid);

impl ChangePacketId {
    /// Creates a new change packet ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses a change packet ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ChangePacketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangePacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangePacketId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
