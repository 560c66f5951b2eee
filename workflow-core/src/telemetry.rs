//! Logging setup for binaries embedding the state layer.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;
use crate::config::LoggingConfig;
use crate::error::CoreError;
use crate::error::Result;

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `config.level`. Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CoreError::Logging(e.to_string()))?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(config.with_target))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(config.with_target))
            .try_init(),
    };
    installed.map_err(|e| CoreError::Logging(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}
