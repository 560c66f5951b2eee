use serde::Deserialize;
use serde::Serialize;

/// What an executor reports about the work it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Idle,
    Busy,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ExecutorError(pub String);

/// The narrow capability the session store needs from whatever is actually
/// running a session's work.
pub trait SessionExecutor: Send + Sync {
    fn send_message(&self, message: &str) -> Result<(), ExecutorError>;
    fn request_stop(&self) -> Result<(), ExecutorError>;
    fn status(&self) -> ExecutorStatus;
}
