use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use workflow_persist::CheckpointStoreConfig;
use workflow_persist::SessionStoreConfig;

use crate::error::Result;

/// Output layout of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_target: true,
        }
    }
}

/// Everything needed to stand up the state layer.
///
/// ```toml
/// [sessions]
/// max_sessions = 500
/// persistence_dir = "/var/lib/workflow/sessions"
///
/// [checkpoints]
/// output_dir = "/var/lib/workflow/checkpoints"
/// compression_enabled = false
///
/// [logging]
/// level = "workflow_persist=debug"
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub sessions: SessionStoreConfig,
    pub checkpoints: CheckpointStoreConfig,
    pub logging: LoggingConfig,
}

impl StateConfig {
    /// Default settings with both stores under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            sessions: SessionStoreConfig::with_dir(root.join("sessions")),
            checkpoints: CheckpointStoreConfig::with_dir(root.join("checkpoints")),
            logging: LoggingConfig::default(),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sessions.validate()?;
        self.checkpoints.validate()?;
        Ok(())
    }
}
