use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tracing::info;
use workflow_persist::CheckpointStore;
use workflow_persist::Clock;
use workflow_persist::DurableStorage;
use workflow_persist::ExportFormat;
use workflow_persist::LocalStorage;
use workflow_persist::SavedCheckpoint;
use workflow_persist::SessionRecord;
use workflow_persist::SessionStatus;
use workflow_persist::SessionStore;
use workflow_persist::SystemClock;
use workflow_persist::checkpoint_summary;
use workflow_persist::export_checkpoints;
use workflow_persist::export_sessions;
use workflow_persist::session_summary;

use crate::config::StateConfig;
use crate::error::Result;

/// Owns the two stores for the lifetime of the orchestrator. Build it once
/// and hand out clones of the `Arc`s.
#[derive(Debug, Clone)]
pub struct StateServices {
    pub sessions: Arc<SessionStore>,
    pub checkpoints: Arc<CheckpointStore>,
}

impl StateServices {
    /// Stores backed by the local filesystem and the system clock.
    pub fn open(config: &StateConfig) -> Result<Self> {
        Self::with_backends(config, Arc::new(LocalStorage::new()), Arc::new(SystemClock))
    }

    pub fn with_backends(
        config: &StateConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let sessions = SessionStore::open(
            config.sessions.clone(),
            Arc::clone(&storage),
            Arc::clone(&clock),
        )?;
        let checkpoints = CheckpointStore::open(config.checkpoints.clone(), storage, clock)?;
        info!("state services ready");
        Ok(Self {
            sessions: Arc::new(sessions),
            checkpoints: Arc::new(checkpoints),
        })
    }

    /// Save the final checkpoint, then end the session. If the save fails the
    /// session is left untouched.
    pub fn finalize_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        payload: Value,
    ) -> Result<(SavedCheckpoint, SessionRecord)> {
        let saved = self.checkpoints.save(session_id, payload)?;
        let record = self.sessions.end(session_id, status)?;
        Ok((saved, record))
    }

    /// Both exports in one document.
    pub fn report(&self, format: ExportFormat) -> Result<String> {
        let sessions = export_sessions(&self.sessions, format)?;
        let checkpoints = export_checkpoints(&self.checkpoints, format)?;
        match format {
            ExportFormat::Json => {
                let combined = json!({
                    "sessions": serde_json::from_str::<Value>(&sessions)?,
                    "checkpoints": serde_json::from_str::<Value>(&checkpoints)?,
                });
                Ok(serde_json::to_string_pretty(&combined)?)
            }
            ExportFormat::Csv | ExportFormat::Markdown => Ok(format!("{sessions}\n{checkpoints}")),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\n\n{}",
            session_summary(&self.sessions.analytics()),
            checkpoint_summary(&self.checkpoints.analytics())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;
    use workflow_persist::ManualClock;
    use workflow_persist::MemoryStorage;
    use workflow_persist::NewSession;
    use workflow_persist::PersistError;
    use workflow_persist::SessionUpdate;

    use crate::error::CoreError;

    fn services(dir: &TempDir) -> StateServices {
        StateServices::open(&StateConfig::rooted_at(dir.path())).unwrap()
    }

    #[test]
    fn test_open_creates_both_directories() {
        let dir = TempDir::new().unwrap();
        let _services = services(&dir);
        assert!(dir.path().join("sessions").is_dir());
        assert!(dir.path().join("checkpoints").is_dir());
    }

    #[test]
    fn test_finalize_session_saves_then_ends() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let id = services
            .sessions
            .create(NewSession::default().with_task("build report"))
            .unwrap();
        services
            .sessions
            .update(&id, SessionUpdate::default().with_status(SessionStatus::Running))
            .unwrap();

        let (saved, record) = services
            .finalize_session(&id, SessionStatus::Completed, json!({"phase": 2}))
            .unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(
            services.checkpoints.load_latest(&id).unwrap().payload,
            json!({"phase": 2})
        );
    }

    #[test]
    fn test_finalize_unknown_session_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        let err = services
            .finalize_session("sdk-missing", SessionStatus::Completed, json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Persist(PersistError::SessionNotFound(_))
        ));
        assert!(services.checkpoints.exists("sdk-missing"));
    }

    #[test]
    fn test_json_report_nests_both_exports() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        ));
        let storage = Arc::new(MemoryStorage::new(clock.clone()));
        let services =
            StateServices::with_backends(&StateConfig::rooted_at(Path::new("/state")), storage, clock)
                .unwrap();
        let id = services.sessions.create(NewSession::default()).unwrap();
        services.checkpoints.save(&id, json!({"step": 1})).unwrap();

        let report: Value =
            serde_json::from_str(&services.report(ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(report["sessions"]["analytics"]["total_created"], json!(1));
        assert_eq!(report["checkpoints"]["analytics"]["total_saves"], json!(1));
    }

    #[test]
    fn test_text_report_and_summary() {
        let dir = TempDir::new().unwrap();
        let services = services(&dir);
        services.sessions.create(NewSession::default()).unwrap();

        let csv = services.report(ExportFormat::Csv).unwrap();
        assert!(csv.contains("=== Session Analytics ==="));
        assert!(csv.contains("=== Checkpoint Analytics ==="));

        let summary = services.summary();
        assert!(summary.starts_with("=== Session Store Summary ==="));
        assert!(summary.contains("=== Checkpoint Store Summary ==="));
    }
}
