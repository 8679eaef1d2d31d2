//! Authoritative side of the syncable engine.
//!
//! # Components
//!
//! - **Container**: in-memory table of live syncables, plus the borrowed
//!   [`SyncableObject`] view used to follow extensions and associations
//! - **Schema**: per-type default ACL, securing fields and named rules
//! - **Access**: per-object, association-aware rights resolution
//! - **Diff**: structural diff records and their replay
//! - **Plant**: transactional change processing into a
//!   [`ChangePlantProcessingResult`]
//! - **Applicator**: writes a processing result back into a container
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use syncable_core::{
//!     ChangePlant, Context, ContainerApplicator, SchemaRegistry, SyncableContainer,
//! };
//! use syncable_types::{ChangePacket, Syncable, SyncableRef};
//!
//! let plant = ChangePlant::new().with("update-brief", |session| {
//!     let brief = session.options()["brief"].clone();
//!     session.syncable_mut("task")?.set("brief", brief);
//!     Ok(())
//! });
//!
//! let mut container = SyncableContainer::with_syncables(
//!     Arc::new(SchemaRegistry::new()),
//!     [Syncable::new("task", "task-1").with_field("brief", "x")],
//! );
//!
//! let packet = ChangePacket::new("update-brief")
//!     .with_ref("task", SyncableRef::new("task", "task-1"))
//!     .with_options(serde_json::json!({"brief": "y"}));
//!
//! let result = plant
//!     .process(&packet, &Context::server(), &container, Some(1))
//!     .unwrap();
//! assert_eq!(result.updates.len(), 1);
//!
//! ContainerApplicator::new(&mut container).apply(&result).unwrap();
//! ```

mod access;
mod applicator;
mod container;
mod context;
pub mod diff;
mod error;
mod plant;
mod schema;

pub use access::AccessRightsOptions;
pub use applicator::ContainerApplicator;
pub use container::{SyncableContainer, SyncableObject};
pub use context::{Context, Environment};
pub use diff::{ArrayItem, Diff, DiffError, PathSegment};
pub use error::{CoreError, CoreResult};
pub use plant::{
    ChangePlant, ChangePlantProcessingResult, ChangePlantUpdateItem, ChangeProcessor,
    ChangeSession,
};
pub use schema::{AccessControlRule, BASIC_RULE, SchemaRegistry, SyncableSchema};
