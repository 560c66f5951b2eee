//! Persistent state for the workflow orchestrator: a bounded session store
//! with durable overflow and a versioned, compressed checkpoint store.

pub mod analytics;
pub mod checkpoint;
pub mod checkpoint_store;
pub mod clock;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod export;
pub mod history;
pub mod search;
pub mod session;
pub mod session_store;
pub mod storage;

// Re-export key types for convenience.
pub use analytics::{CheckpointAnalytics, SessionAnalytics, TagCount};
pub use checkpoint::{CheckpointRecord, CheckpointVersion, SavedCheckpoint};
pub use checkpoint_store::CheckpointStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CheckpointStoreConfig, SessionStoreConfig};
pub use error::{PersistError, Result};
pub use executor::{ExecutorError, ExecutorStatus, SessionExecutor};
pub use export::{
    ExportFormat, checkpoint_summary, export_checkpoints, export_sessions, session_summary,
};
pub use history::OperationRecord;
pub use search::SessionFilter;
pub use session::{NewSession, SessionRecord, SessionStatus, SessionUpdate};
pub use session_store::SessionStore;
pub use storage::{DurableStorage, EntryMeta, LocalStorage, MemoryStorage};
