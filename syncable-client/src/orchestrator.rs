//! Client orchestrator: drives the engine and performs all I/O.
//!
//! One task owns the [`SyncClient`] and multiplexes three sources with
//! `tokio::select!`: inbound server events, commands from
//! [`ClientHandle`]s and the engine's next timer deadline. After every step
//! it sends queued outbound events through the transport and forwards
//! queued notifications.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use syncable_types::{ChangePacketId, SyncableId};

use crate::engine::SyncClient;
use crate::error::{ClientError, ClientResult};
use crate::notification::Notification;
use crate::protocol::{RawChange, RawCreation, Resource, ServerEvent};
use crate::transport::ClientTransport;

/// Commands sent from handles to the orchestrator.
#[derive(Debug)]
pub enum ClientCommand {
    Create {
        creation: RawCreation,
        reply: oneshot::Sender<ClientResult<Resource>>,
    },
    CreateOnServer {
        creation: RawCreation,
        reply: oneshot::Sender<ClientResult<ChangePacketId>>,
    },
    Update {
        change: RawChange,
        reply: oneshot::Sender<ClientResult<Option<ChangePacketId>>>,
    },
    Remove {
        subject: String,
        resource: SyncableId,
        reply: oneshot::Sender<ClientResult<ChangePacketId>>,
    },
    Request {
        subject: String,
        resources: Vec<SyncableId>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Shutdown,
}

/// Cloneable handle issuing local operations to a running orchestrator.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub async fn create(&self, creation: RawCreation) -> ClientResult<Resource> {
        self.call(|reply| ClientCommand::Create { creation, reply })
            .await
    }

    pub async fn create_on_server(&self, creation: RawCreation) -> ClientResult<ChangePacketId> {
        self.call(|reply| ClientCommand::CreateOnServer { creation, reply })
            .await
    }

    pub async fn update(&self, change: RawChange) -> ClientResult<Option<ChangePacketId>> {
        self.call(|reply| ClientCommand::Update { change, reply })
            .await
    }

    pub async fn remove(
        &self,
        subject: impl Into<String>,
        resource: SyncableId,
    ) -> ClientResult<ChangePacketId> {
        let subject = subject.into();
        self.call(|reply| ClientCommand::Remove {
            subject,
            resource,
            reply,
        })
        .await
    }

    pub async fn request(
        &self,
        subject: impl Into<String>,
        resources: Vec<SyncableId>,
    ) -> ClientResult<()> {
        let subject = subject.into();
        self.call(|reply| ClientCommand::Request {
            subject,
            resources,
            reply,
        })
        .await
    }

    /// Stops the orchestrator; its `run` future then returns the engine.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.commands
            .send(ClientCommand::Shutdown)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<ClientResult<T>>) -> ClientCommand,
    ) -> ClientResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        response.await.map_err(|_| ClientError::ChannelClosed)?
    }
}

/// Owns the engine and its I/O.
pub struct ClientOrchestrator<T: ClientTransport> {
    client: SyncClient,
    transport: T,
    inbound: mpsc::Receiver<ServerEvent>,
    commands: mpsc::Receiver<ClientCommand>,
    notifications: mpsc::UnboundedSender<Notification>,
}

/// Wires an orchestrator around a configured engine.
///
/// Returns the orchestrator (to be spawned with [`ClientOrchestrator::run`]),
/// a handle for local operations and the notification stream.
pub fn create_orchestrator<T: ClientTransport>(
    client: SyncClient,
    transport: T,
    inbound: mpsc::Receiver<ServerEvent>,
) -> (
    ClientOrchestrator<T>,
    ClientHandle,
    mpsc::UnboundedReceiver<Notification>,
) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (notification_tx, notification_rx) = mpsc::unbounded_channel();

    let orchestrator = ClientOrchestrator {
        client,
        transport,
        inbound,
        commands: command_rx,
        notifications: notification_tx,
    };

    (
        orchestrator,
        ClientHandle {
            commands: command_tx,
        },
        notification_rx,
    )
}

impl<T: ClientTransport> ClientOrchestrator<T> {
    /// Subscribes every subject, then runs until shut down or until both the
    /// inbound and command channels close. Returns the engine.
    pub async fn run(mut self) -> SyncClient {
        info!("client orchestrator started");
        self.client.subscribe();

        let mut inbound_open = true;
        loop {
            self.flush().await;

            let deadline = self.client.next_deadline();

            tokio::select! {
                event = self.inbound.recv(), if inbound_open => match event {
                    Some(event) => self.client.handle_event(event, Instant::now()),
                    None => {
                        debug!("inbound channel closed");
                        inbound_open = false;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.execute(command),
                },
                _ = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => self.client.poll_timers(Instant::now()),
            }
        }

        self.flush().await;
        info!("client orchestrator stopped");
        self.client
    }

    fn execute(&mut self, command: ClientCommand) {
        let now = Instant::now();
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            ClientCommand::Create { creation, reply } => {
                let _ = reply.send(self.client.create(creation, now));
            }
            ClientCommand::CreateOnServer { creation, reply } => {
                let _ = reply.send(self.client.create_on_server(creation, now));
            }
            ClientCommand::Update { change, reply } => {
                let _ = reply.send(self.client.update(change, now));
            }
            ClientCommand::Remove {
                subject,
                resource,
                reply,
            } => {
                let _ = reply.send(self.client.remove(&subject, &resource, now));
            }
            ClientCommand::Request {
                subject,
                resources,
                reply,
            } => {
                let _ = reply.send(self.client.request(&subject, resources, now));
            }
            ClientCommand::Shutdown => {}
        }
    }

    async fn flush(&mut self) {
        for event in self.client.drain_outbound() {
            if let Err(error) = self.transport.send(event).await {
                warn!(%error, "failed to send client event");
            }
        }

        for notification in self.client.drain_notifications() {
            if self.notifications.send(notification).is_err() {
                debug!("notification receiver dropped");
            }
        }
    }
}
