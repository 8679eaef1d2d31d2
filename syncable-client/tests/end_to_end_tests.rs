//! End-to-end: a client change processed by the server-side change plant,
//! applied to the container and broadcast back as a confirmation.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use syncable_client::{
    Change, ClientConfig, ClientEvent, MergeDefinition, RawChange, Resource, ServerEvent,
    SyncClient,
};
use syncable_core::{
    ChangePlant, ChangePlantProcessingResult, Context, ContainerApplicator, SchemaRegistry,
    SyncableContainer,
};
use syncable_types::{ChangePacket, LogicalClock, Syncable, SyncableRef};
use tokio::time::Instant;

/// Server side of the loop: plant, container and clock.
struct Server {
    plant: ChangePlant,
    container: SyncableContainer,
    clock: LogicalClock,
}

impl Server {
    fn new() -> Self {
        let plant = ChangePlant::new().with("update-task", |session| {
            let brief = session.options()["brief"].clone();
            session.syncable_mut("task")?.set("brief", brief);
            Ok(())
        });
        let container = SyncableContainer::with_syncables(
            Arc::new(SchemaRegistry::new()),
            [Syncable::new("task", "task-1").with_field("brief", "x")],
        );

        Self {
            plant,
            container,
            clock: LogicalClock::default(),
        }
    }

    fn snapshot(&self, id: &str) -> Resource {
        let syncable = self
            .container
            .get_syncable(&SyncableRef::new("task", id))
            .unwrap();
        Resource::from_syncable(syncable)
    }

    /// Processes a client change and returns the broadcast confirming it.
    fn handle(&mut self, change: &Change) -> (ChangePlantProcessingResult, Change) {
        let mut packet = ChangePacket::new(change.change_type.clone())
            .with_ref("task", SyncableRef::new("task", change.resource.clone()))
            .with_options(change.options.clone());
        packet.id = change.id;

        let clock = self.clock.tick();
        let result = self
            .plant
            .process(&packet, &Context::server(), &self.container, Some(clock))
            .unwrap();
        ContainerApplicator::new(&mut self.container)
            .apply(&result)
            .unwrap();

        let broadcast = Change::new(change.subject.clone(), change.resource.clone(), change.change_type.clone())
            .with_id(result.id)
            .with_options(change.options.clone())
            .with_snapshot(self.snapshot(change.resource.as_str()))
            .with_timestamp(clock);

        (result, broadcast)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn optimistic_update_round_trips_through_change_plant() {
    init_tracing();
    let now = Instant::now();
    let mut server = Server::new();
    let mut client = SyncClient::new(ClientConfig::default());
    client.register("task", MergeDefinition);

    client.subscribe();
    let subscription = client.subscription_id("task").unwrap();
    client.handle_event(
        ServerEvent::Subscribed {
            subscription,
            subject: "task".into(),
        },
        now,
    );
    client.handle_event(
        ServerEvent::Snapshots {
            subject: "task".into(),
            snapshots: vec![server.snapshot("task-1")],
            timestamp: 0,
        },
        now,
    );
    client.drain_outbound();

    client
        .update(
            RawChange::new("task", "task-1", "update-task").with_options(json!({ "brief": "y" })),
            now,
        )
        .unwrap();

    let task_id = "task-1".into();
    let optimistic = client.resource("task", &task_id).unwrap();
    assert_eq!(optimistic.get_str("brief"), Some("y"));
    assert!(optimistic.syncing);

    let outbound = client.drain_outbound();
    let [ClientEvent::Change(change)] = outbound.as_slice() else {
        panic!("expected one change, got {outbound:?}");
    };

    let (result, broadcast) = server.handle(change);

    assert_eq!(result.updates.len(), 1);
    assert!(
        result.updates[0]
            .diffs
            .iter()
            .any(|diff| diff.field() == Some("brief"))
    );

    client.handle_event(ServerEvent::Change(broadcast), now);

    let confirmed = client.resource("task", &task_id).unwrap();
    assert_eq!(confirmed, &server.snapshot("task-1"));
    assert_eq!(confirmed.get_str("brief"), Some("y"));
    assert_eq!(confirmed.timestamp, 1);
    assert!(!confirmed.syncing);
    assert_eq!(client.pending_changes("task", &task_id), 0);
    assert!(!client.syncing());
}
