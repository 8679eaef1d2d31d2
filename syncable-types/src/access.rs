//! Access control entries and rights.
//!
//! Entries are plain data; evaluating them against a requesting context is
//! the job of the resolver in `syncable-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A right that can be granted on a syncable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRight {
    Read,
    Write,
    Full,
}

/// Every right, in evaluation order.
pub const ACCESS_RIGHTS: [AccessRight; 3] = [AccessRight::Read, AccessRight::Write, AccessRight::Full];

impl AccessRight {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entry grants or withholds its rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessControlEntryType {
    Allow,
    Deny,
}

/// A named, rule-bound statement granting or denying a set of rights.
///
/// Entry names are unique within an effective list: when lists are merged,
/// a later entry with the same name replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: AccessControlEntryType,
    pub rights: Vec<AccessRight>,
    /// Name of the registered rule deciding whether this entry applies.
    pub rule: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
    /// Rights from this entry may be granted onwards.
    #[serde(default)]
    pub grantable: bool,
    /// Takes precedence over non-explicit entries regardless of position.
    #[serde(default)]
    pub explicit: bool,
}

impl AccessControlEntry {
    fn with_type(
        name: impl Into<String>,
        entry_type: AccessControlEntryType,
        rights: impl IntoIterator<Item = AccessRight>,
    ) -> Self {
        Self {
            name: name.into(),
            entry_type,
            rights: rights.into_iter().collect(),
            rule: "basic".to_string(),
            options: Value::Null,
            grantable: false,
            explicit: false,
        }
    }

    /// An `allow` entry evaluated with the built-in `basic` rule.
    pub fn allow(name: impl Into<String>, rights: impl IntoIterator<Item = AccessRight>) -> Self {
        Self::with_type(name, AccessControlEntryType::Allow, rights)
    }

    /// A `deny` entry evaluated with the built-in `basic` rule.
    pub fn deny(name: impl Into<String>, rights: impl IntoIterator<Item = AccessRight>) -> Self {
        Self::with_type(name, AccessControlEntryType::Deny, rights)
    }

    /// Binds the entry to a named rule with options.
    pub fn with_rule(mut self, rule: impl Into<String>, options: Value) -> Self {
        self.rule = rule.into();
        self.options = options;
        self
    }

    pub fn grantable(mut self) -> Self {
        self.grantable = true;
        self
    }

    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }
}

/// A single value or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: PartialEq> OneOrMany<T> {
    pub fn contains(&self, value: &T) -> bool {
        match self {
            Self::One(one) => one == value,
            Self::Many(many) => many.contains(value),
        }
    }
}

/// Which target types a securing entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecuringMatch {
    Not { not: OneOrMany<String> },
    Types(OneOrMany<String>),
}

impl SecuringMatch {
    /// Returns true if an entry with this match applies to `syncable_type`.
    pub fn matches(&self, syncable_type: &str) -> bool {
        let syncable_type = syncable_type.to_string();

        match self {
            Self::Types(types) => types.contains(&syncable_type),
            Self::Not { not } => !not.contains(&syncable_type),
        }
    }
}

/// An entry an object extends onto the objects that associate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuringAccessControlEntry {
    #[serde(flatten)]
    pub entry: AccessControlEntry,
    /// Restricts the entry to some target types; `None` matches every type.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub target_match: Option<SecuringMatch>,
}

impl SecuringAccessControlEntry {
    pub fn new(entry: AccessControlEntry) -> Self {
        Self {
            entry,
            target_match: None,
        }
    }

    pub fn matching(mut self, target_match: SecuringMatch) -> Self {
        self.target_match = Some(target_match);
        self
    }

    /// Returns true if this entry applies to targets of `syncable_type`.
    pub fn applies_to(&self, syncable_type: &str) -> bool {
        self.target_match
            .as_ref()
            .is_none_or(|target_match| target_match.matches(syncable_type))
    }
}
