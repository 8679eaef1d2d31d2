//! Per-subject behaviour of the client engine.

use crate::protocol::{Change, Resource};
use serde_json::{Map, Value};

/// Describes how resources of one subject are subscribed to, built from
/// creations, updated by changes and filtered for visibility.
///
/// Implementations must be deterministic: the engine replays queued changes
/// onto every fresh server snapshot, so `create` and `update` may run many
/// times for the same change.
pub trait SyncableDefinition: Send + Sync {
    /// Parameters sent along with every subscription of the subject.
    fn generate_subscription(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Adjusts a locally issued change before it is queued and sent.
    fn preprocess_change(&self, _change: &mut Change) {}

    /// Builds the optimistic resource of a creation.
    fn create(&self, change: &Change) -> Resource;

    /// Applies an update change to a resource.
    fn update(&self, resource: &Resource, change: &Change) -> Resource;

    /// Whether this client may see the resource.
    fn test_visibility(&self, _resource: &Resource) -> bool {
        true
    }
}

/// A definition that treats the change options as a field patch: creations
/// take the options object as their fields, updates shallow-merge it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeDefinition;

impl SyncableDefinition for MergeDefinition {
    fn create(&self, change: &Change) -> Resource {
        let mut resource = Resource::new(change.resource.clone());
        if let Value::Object(fields) = &change.options {
            resource.fields = fields.clone();
        }
        resource
    }

    fn update(&self, resource: &Resource, change: &Change) -> Resource {
        let mut updated = resource.clone();
        if let Value::Object(fields) = &change.options {
            for (name, value) in fields {
                updated.fields.insert(name.clone(), value.clone());
            }
        }
        updated
    }
}
