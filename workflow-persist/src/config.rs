use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::PersistError;
use crate::error::Result;

pub const DEFAULT_MAX_SESSIONS: usize = 1000;
pub const DEFAULT_MAX_VERSIONS_PER_SESSION: usize = 10;
pub const DEFAULT_MAX_TRACKED_SESSIONS: usize = 1000;
pub const DEFAULT_HISTORY_SIZE: usize = 100;
pub const DEFAULT_TOP_TAGS: usize = 10;

/// `~/.sdk-workflow`, or a relative `.sdk-workflow` when there is no home.
pub fn default_state_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sdk-workflow")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    /// Upper bound on resident session records.
    pub max_sessions: usize,
    pub persistence_enabled: bool,
    pub persistence_dir: PathBuf,
    pub history_size: usize,
    /// How many tags `analytics()` reports.
    pub top_tags: usize,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            persistence_enabled: true,
            persistence_dir: default_state_root().join("sessions"),
            history_size: DEFAULT_HISTORY_SIZE,
            top_tags: DEFAULT_TOP_TAGS,
        }
    }
}

impl SessionStoreConfig {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            persistence_dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(PersistError::InvalidConfig(
                "max_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointStoreConfig {
    pub output_dir: PathBuf,
    pub max_versions_per_session: usize,
    pub compression_enabled: bool,
    /// Sessions whose latest version is remembered without a directory scan.
    pub max_tracked_sessions: usize,
    pub history_size: usize,
}

impl Default for CheckpointStoreConfig {
    fn default() -> Self {
        Self {
            output_dir: default_state_root().join("checkpoints"),
            max_versions_per_session: DEFAULT_MAX_VERSIONS_PER_SESSION,
            compression_enabled: true,
            max_tracked_sessions: DEFAULT_MAX_TRACKED_SESSIONS,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl CheckpointStoreConfig {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_versions_per_session == 0 {
            return Err(PersistError::InvalidConfig(
                "max_versions_per_session must be at least 1".into(),
            ));
        }
        if self.max_tracked_sessions == 0 {
            return Err(PersistError::InvalidConfig(
                "max_tracked_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_defaults() {
        let config = SessionStoreConfig::default();
        assert_eq!(config.max_sessions, 1000);
        assert!(config.persistence_enabled);
        assert!(config.persistence_dir.ends_with(".sdk-workflow/sessions"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_checkpoint_defaults() {
        let config = CheckpointStoreConfig::with_dir("/tmp/cp");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/cp"));
        assert_eq!(config.max_versions_per_session, 10);
        assert!(config.compression_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_bounds_are_rejected() {
        let sessions = SessionStoreConfig {
            max_sessions: 0,
            ..SessionStoreConfig::default()
        };
        assert!(matches!(
            sessions.validate(),
            Err(PersistError::InvalidConfig(_))
        ));

        let checkpoints = CheckpointStoreConfig {
            max_versions_per_session: 0,
            ..CheckpointStoreConfig::default()
        };
        assert!(checkpoints.validate().is_err());

        let checkpoints = CheckpointStoreConfig {
            max_tracked_sessions: 0,
            ..CheckpointStoreConfig::default()
        };
        assert!(checkpoints.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: CheckpointStoreConfig =
            serde_json::from_str(r#"{"compression_enabled": false}"#).unwrap();
        assert!(!config.compression_enabled);
        assert_eq!(config.max_versions_per_session, 10);
    }
}
