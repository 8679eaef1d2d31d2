//! Transport layer abstraction.
//!
//! The orchestrator sends outbound events through a [`ClientTransport`];
//! inbound server events arrive on a channel fed by the embedder.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};
use crate::protocol::ClientEvent;

/// Sends client events to the server.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn send(&self, event: ClientEvent) -> ClientResult<()>;
}

/// A transport writing events into an in-process channel, e.g. towards a
/// socket writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { sender }
    }

    /// Creates a transport together with the receiving end of its channel.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    async fn send(&self, event: ClientEvent) -> ClientResult<()> {
        self.sender
            .send(event)
            .map_err(|_| ClientError::ChannelClosed)
    }
}

/// In-memory transport recording every sent event, for tests.
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        failing: bool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// A transport whose every send fails.
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<ClientEvent> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn take(&self) -> Vec<ClientEvent> {
            std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
        }
    }

    #[async_trait]
    impl ClientTransport for MockTransport {
        async fn send(&self, event: ClientEvent) -> ClientResult<()> {
            if self.failing {
                return Err(ClientError::Transport("mock transport failure".to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
            Ok(())
        }
    }
}
