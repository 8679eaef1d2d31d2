//! Requesting context handed to access rules and change processors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use syncable_types::SyncableRef;

/// Where a change is being processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Authoritative processing; `now` comes from the wall clock.
    #[default]
    Server,
    /// Replica preview; `now` comes from the packet's `createdAt`.
    Client,
}

/// The requesting context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub environment: Environment,
    /// The user object the request is made on behalf of, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SyncableRef>,
    /// Free-form attributes rules may inspect.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Context {
    pub fn server() -> Self {
        Self {
            environment: Environment::Server,
            ..Self::default()
        }
    }

    pub fn client() -> Self {
        Self {
            environment: Environment::Client,
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: SyncableRef) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
