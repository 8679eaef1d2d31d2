//! Error types for the core.

use crate::diff::DiffError;
use syncable_types::{AccessRight, SyncableRef};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

fn join_rights(rights: &[AccessRight]) -> String {
    rights
        .iter()
        .map(AccessRight::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while resolving access or processing a change.
///
/// Any of these aborts a change as a whole.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A referenced syncable is not in the container.
    #[error("syncable not found: {reference}")]
    NotFound { reference: SyncableRef },

    /// No processor is registered for the change type.
    #[error("unknown change type: {0}")]
    UnknownChangeType(String),

    /// An access control entry names a rule the type never registered.
    #[error("unknown access control rule \"{rule}\" for type `{syncable_type}`")]
    UnknownRule { syncable_type: String, rule: String },

    /// Granted rights do not cover the required ones.
    #[error(
        "access denied: granted rights ({}) do not match requirements ({}), missing ({})",
        join_rights(.granted),
        join_rights(.required),
        join_rights(.missing)
    )]
    AccessDenied {
        granted: Vec<AccessRight>,
        required: Vec<AccessRight>,
        missing: Vec<AccessRight>,
    },

    /// A processor attempted something it must never do.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A diff could not be replayed.
    #[error("diff error: {0}")]
    Diff(#[from] DiffError),
}

impl CoreError {
    pub(crate) fn not_found(reference: &SyncableRef) -> Self {
        Self::NotFound {
            reference: reference.clone(),
        }
    }
}
