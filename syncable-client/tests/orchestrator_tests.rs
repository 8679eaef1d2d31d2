//! Tests for orchestrator.rs and transport.rs: the engine driven over
//! channels with paused tokio time.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use syncable_client::mock::MockTransport;
use syncable_client::{
    ChannelTransport, ClientConfig, ClientError, ClientEvent, ClientTransport, MergeDefinition,
    Notification, RawChange, Request, Resource, ServerEvent, Subscription, SyncClient,
    create_orchestrator,
};
use syncable_types::SyncableId;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_client() -> SyncClient {
    let mut client = SyncClient::new(ClientConfig::default());
    client.register("task", MergeDefinition);
    client
}

/// Waits until the transport has recorded at least `count` events.
async fn wait_for_sent(transport: &MockTransport, count: usize) -> Vec<ClientEvent> {
    for _ in 0..100 {
        let sent = transport.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::task::yield_now().await;
    }
    panic!("transport never recorded {count} events");
}

fn subscription_of(event: &ClientEvent) -> Subscription {
    match event {
        ClientEvent::Subscribe(subscription) => subscription.clone(),
        other => panic!("expected a subscription, got {other:?}"),
    }
}

async fn load_task(inbound: &mpsc::Sender<ServerEvent>, transport: &MockTransport) {
    let sent = wait_for_sent(transport, 1).await;
    let subscription = subscription_of(&sent[0]);

    inbound
        .send(ServerEvent::Subscribed {
            subscription: subscription.id,
            subject: "task".into(),
        })
        .await
        .unwrap();
    inbound
        .send(ServerEvent::Snapshots {
            subject: "task".into(),
            snapshots: vec![Resource::new("task-1").with_field("brief", "x").with_timestamp(1)],
            timestamp: 1,
        })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn orchestrator_subscribes_and_applies_events() {
    init_tracing();
    let transport = MockTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let (orchestrator, handle, mut notifications) =
        create_orchestrator(make_client(), transport.clone(), inbound_rx);
    let task = tokio::spawn(orchestrator.run());

    load_task(&inbound_tx, &transport).await;

    assert_eq!(
        notifications.recv().await,
        Some(Notification::Ready {
            subject: "task".into()
        })
    );

    let change_id = handle
        .update(RawChange::new("task", "task-1", "update-task").with_options(json!({ "brief": "y" })))
        .await
        .unwrap()
        .unwrap();

    let Some(Notification::ResourceChange(change)) = notifications.recv().await else {
        panic!("expected a resource change");
    };
    assert_eq!(change.object.unwrap().get_str("brief"), Some("y"));

    let sent = wait_for_sent(&transport, 2).await;
    assert!(matches!(&sent[1], ClientEvent::Change(change) if change.id == change_id));

    handle.shutdown().await.unwrap();
    let client = task.await.unwrap();

    assert!(client.syncing());
    assert_eq!(client.pending_changes("task", &SyncableId::from("task-1")), 1);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_expires_unconfirmed_changes() {
    init_tracing();
    let transport = MockTransport::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(16);
    let (orchestrator, handle, mut notifications) =
        create_orchestrator(make_client(), transport.clone(), inbound_rx);
    let task = tokio::spawn(orchestrator.run());

    load_task(&inbound_tx, &transport).await;
    notifications.recv().await;

    let change_id = handle
        .update(RawChange::new("task", "task-1", "update-task").with_options(json!({ "brief": "y" })))
        .await
        .unwrap()
        .unwrap();
    notifications.recv().await;

    // Time auto-advances to the confirmation deadline.
    let Some(Notification::ResourceChange(rollback)) = notifications.recv().await else {
        panic!("expected a rollback");
    };
    assert_eq!(rollback.object.unwrap().get_str("brief"), Some("x"));
    assert_eq!(
        notifications.recv().await,
        Some(Notification::Expired {
            subject: "task".into(),
            change_id,
        })
    );

    handle.shutdown().await.unwrap();
    let client = task.await.unwrap();
    assert!(!client.syncing());
}

#[tokio::test(start_paused = true)]
async fn orchestrator_batches_requests() {
    let transport = MockTransport::new();
    let (_inbound_tx, inbound_rx) = mpsc::channel(16);
    let (orchestrator, handle, _notifications) =
        create_orchestrator(make_client(), transport.clone(), inbound_rx);
    let task = tokio::spawn(orchestrator.run());

    handle
        .request("task", vec![SyncableId::from("b")])
        .await
        .unwrap();
    handle
        .request("task", vec![SyncableId::from("a"), SyncableId::from("b")])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let requests: Vec<ClientEvent> = transport
        .sent()
        .into_iter()
        .filter(|event| matches!(event, ClientEvent::Request(_)))
        .collect();
    assert_eq!(
        requests,
        vec![ClientEvent::Request(Request {
            subject: "task".into(),
            resources: vec![SyncableId::from("a"), SyncableId::from("b")],
        })]
    );

    let err = handle
        .request("note", vec![SyncableId::from("a")])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownSubject(_)));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn orchestrator_survives_transport_failures() {
    init_tracing();
    let (_inbound_tx, inbound_rx) = mpsc::channel(16);
    let (orchestrator, handle, _notifications) =
        create_orchestrator(make_client(), MockTransport::failing(), inbound_rx);
    let task = tokio::spawn(orchestrator.run());

    let err = handle
        .update(RawChange::new("task", "task-1", "update-task"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ResourceNotFound { .. }));

    handle.shutdown().await.unwrap();
    let client = task.await.unwrap();
    assert!(!client.is_ready("task"));
}

#[tokio::test]
async fn handle_fails_once_orchestrator_is_gone() {
    let (_inbound_tx, inbound_rx) = mpsc::channel(16);
    let (orchestrator, handle, _notifications) =
        create_orchestrator(make_client(), MockTransport::new(), inbound_rx);
    drop(orchestrator);

    let err = handle.request("task", vec![SyncableId::from("a")]).await.unwrap_err();
    assert!(matches!(err, ClientError::ChannelClosed));
}

#[tokio::test]
async fn channel_transport_forwards_events() {
    let (transport, mut receiver) = ChannelTransport::pair();
    let event = ClientEvent::Request(Request {
        subject: "task".into(),
        resources: vec![SyncableId::from("a")],
    });

    transport.send(event.clone()).await.unwrap();
    assert_eq!(receiver.recv().await, Some(event.clone()));

    drop(receiver);
    let err = transport.send(event).await.unwrap_err();
    assert!(matches!(err, ClientError::ChannelClosed));
}

#[tokio::test]
async fn mock_transport_records_and_takes() {
    let transport = MockTransport::new();
    let event = ClientEvent::Request(Request {
        subject: "task".into(),
        resources: vec![],
    });

    transport.send(event.clone()).await.unwrap();
    assert_eq!(transport.take(), vec![event]);
    assert!(transport.sent().is_empty());

    let err = MockTransport::failing().send(ClientEvent::Request(Request {
        subject: "task".into(),
        resources: vec![],
    }))
    .await
    .unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}
