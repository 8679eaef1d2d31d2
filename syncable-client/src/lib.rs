//! Client reconciliation engine for the syncable engine.
//!
//! This crate keeps client-side replicas of server syncables consistent:
//! - Subscription state machine per subject (`Unsubscribed -> Subscribing ->
//!   Subscribed`), with stale acknowledgements ignored
//! - Optimistic local changes, queued and rebased onto every confirmed
//!   snapshot the server broadcasts
//! - Compound views derived from an entry subject and indexed dependencies
//! - Coalesced resource requests and expiry of unconfirmed changes
//!
//! [`SyncClient`] is a pure state machine; [`ClientOrchestrator`] runs it
//! on tokio against a [`ClientTransport`].
//!
//! # Example
//!
//! ```
//! use syncable_client::{ClientConfig, MergeDefinition, RawChange, Resource, ServerEvent, SyncClient};
//! use serde_json::json;
//! use tokio::time::Instant;
//!
//! let mut client = SyncClient::new(ClientConfig::default());
//! client.register("task", MergeDefinition);
//! client.subscribe();
//!
//! let subscription = client.subscription_id("task").unwrap();
//! let now = Instant::now();
//! client.handle_event(
//!     ServerEvent::Subscribed { subscription, subject: "task".into() },
//!     now,
//! );
//! client.handle_event(
//!     ServerEvent::Snapshots {
//!         subject: "task".into(),
//!         snapshots: vec![Resource::new("task-1").with_field("brief", "x")],
//!         timestamp: 1,
//!     },
//!     now,
//! );
//!
//! client
//!     .update(
//!         RawChange::new("task", "task-1", "update-task").with_options(json!({"brief": "y"})),
//!         now,
//!     )
//!     .unwrap();
//!
//! let task = client.resource("task", &"task-1".into()).unwrap();
//! assert_eq!(task.get_str("brief"), Some("y"));
//! assert!(task.syncing);
//! ```

mod compound;
mod config;
mod definition;
mod engine;
mod error;
mod notification;
mod orchestrator;
mod protocol;
mod state;
mod transport;

pub use compound::{
    CompoundBuilder, CompoundDefinition, CompoundDependencyHost, Dependency, EntryResolution,
    EntryResolver,
};
pub use config::ClientConfig;
pub use definition::{MergeDefinition, SyncableDefinition};
pub use engine::SyncClient;
pub use error::{ClientError, ClientResult};
pub use notification::{ChangeNotification, Notification};
pub use orchestrator::{ClientCommand, ClientHandle, ClientOrchestrator, create_orchestrator};
pub use protocol::{
    CREATE, Change, ClientEvent, REMOVE, RawChange, RawCreation, Request, Resource, ServerEvent,
    Subscription, SubscriptionId,
};
pub use state::SubscriptionState;
pub use transport::{ChannelTransport, ClientTransport, mock};
