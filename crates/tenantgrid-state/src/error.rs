//! Error types for TenantGrid persisted state.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("configuration at {path} is locked by another operation ({holder})")]
    Locked { path: String, holder: String },

    #[error("invalid snapshot id: {0}")]
    InvalidSnapshotId(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StateError {
    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        StateError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
