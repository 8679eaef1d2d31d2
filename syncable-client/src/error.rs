//! Error types for the client.

use syncable_types::SyncableId;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client engine and its orchestrator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No syncable or compound subject is registered under this name.
    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    /// The resource is not loaded (or not visible) in the subject.
    #[error("resource not found: {subject}/{resource}")]
    ResourceNotFound { subject: String, resource: SyncableId },

    /// A locally created resource would not be visible to this client.
    #[error("created resource {resource} is not visible in {subject}")]
    InvisibleCreation { subject: String, resource: SyncableId },

    /// The orchestrator is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
