use std::path::PathBuf;

use crate::codec::CodecError;
use crate::session::SessionStatus;

/// Errors produced by the session and checkpoint stores.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no checkpoints found for session {0}")]
    CheckpointNotFound(String),

    #[error("backup path does not exist: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("session already exists: {0}")]
    DuplicateId(String),

    #[error("invalid session id: {0:?}")]
    InvalidId(String),

    #[error("invalid status transition for {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid backup directory name: {0}")]
    InvalidBackup(String),

    #[error("persistence is not enabled")]
    PersistenceDisabled,

    #[error("no executor registered for session {0}")]
    NoExecutor(String),

    #[error("executor for session {session_id} failed: {message}")]
    Executor { session_id: String, message: String },

    #[error("storage error while {operation} at {}: {source}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to encode or decode record at {}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

impl PersistError {
    #[must_use]
    pub fn storage(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn codec(path: impl Into<PathBuf>, source: CodecError) -> Self {
        Self::Codec {
            path: path.into(),
            source,
        }
    }

    /// True for the "referenced thing is absent everywhere reachable" class.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::CheckpointNotFound(_) | Self::BackupNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;
