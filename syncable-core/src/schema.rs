//! Per-type syncable schemas and the access control rule registry.
//!
//! Every syncable type may register a [`SyncableSchema`] declaring its
//! default ACL, the fields whose mutation can change rights granted to
//! others, and the named rules its access control entries refer to.

use crate::container::SyncableObject;
use crate::context::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use syncable_types::AccessControlEntry;

/// Name of the rule every type understands; it always passes.
pub const BASIC_RULE: &str = "basic";

/// A registered access control predicate.
///
/// Called with the object owning the entry, the target the entry is
/// evaluated for (the same object unless the entry is a securing entry
/// contributed by an association), the requesting context and the entry's
/// options.
pub type AccessControlRule =
    Arc<dyn Fn(&SyncableObject<'_>, &SyncableObject<'_>, &Context, &Value) -> bool + Send + Sync>;

fn basic_rule(
    _owner: &SyncableObject<'_>,
    _target: &SyncableObject<'_>,
    _context: &Context,
    _options: &Value,
) -> bool {
    true
}

/// Describes how a syncable type is secured.
#[derive(Clone)]
pub struct SyncableSchema {
    pub syncable_type: String,
    /// Entries applied before the object's own `_acl`.
    pub default_acl: Vec<AccessControlEntry>,
    /// Fields whose mutation requires `full` rights.
    pub securing_fields: Vec<String>,
    rules: HashMap<String, AccessControlRule>,
}

impl SyncableSchema {
    pub fn new(syncable_type: impl Into<String>) -> Self {
        let basic: AccessControlRule = Arc::new(basic_rule);

        Self {
            syncable_type: syncable_type.into(),
            default_acl: Vec::new(),
            securing_fields: Vec::new(),
            rules: HashMap::from([(BASIC_RULE.to_string(), basic)]),
        }
    }

    pub fn with_default_acl(mut self, entry: AccessControlEntry) -> Self {
        self.default_acl.push(entry);
        self
    }

    pub fn with_securing_field(mut self, field: impl Into<String>) -> Self {
        self.securing_fields.push(field.into());
        self
    }

    /// Registers a named rule, replacing any rule of the same name.
    pub fn with_rule<F>(mut self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&SyncableObject<'_>, &SyncableObject<'_>, &Context, &Value) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.rules.insert(name.into(), Arc::new(rule));
        self
    }

    /// Looks up a rule by name.
    pub fn rule(&self, name: &str) -> Option<&AccessControlRule> {
        self.rules.get(name)
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }
}

impl fmt::Debug for SyncableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rules: Vec<_> = self.rule_names().collect();
        rules.sort_unstable();

        f.debug_struct("SyncableSchema")
            .field("syncable_type", &self.syncable_type)
            .field("default_acl", &self.default_acl)
            .field("securing_fields", &self.securing_fields)
            .field("rules", &rules)
            .finish()
    }
}

/// Schemas for every known syncable type, registered at startup.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SyncableSchema>,
    fallback: SyncableSchema,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            fallback: SyncableSchema::new("*"),
        }
    }

    /// Registers (or replaces) the schema for its type.
    pub fn register(&mut self, schema: SyncableSchema) {
        self.schemas.insert(schema.syncable_type.clone(), schema);
    }

    pub fn with_schema(mut self, schema: SyncableSchema) -> Self {
        self.register(schema);
        self
    }

    /// Schema for `syncable_type`; unregistered types get an open schema
    /// that only knows the `basic` rule.
    pub fn schema(&self, syncable_type: &str) -> &SyncableSchema {
        self.schemas.get(syncable_type).unwrap_or(&self.fallback)
    }

    pub fn contains(&self, syncable_type: &str) -> bool {
        self.schemas.contains_key(syncable_type)
    }
}
