//! Wires the workflow state layer together: configuration, logging and the
//! shared session and checkpoint stores.

pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;

pub use config::{LogFormat, LoggingConfig, StateConfig};
pub use error::{CoreError, Result};
pub use state::StateServices;
pub use telemetry::init_logging;
