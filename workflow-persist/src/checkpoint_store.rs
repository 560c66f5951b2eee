//! Versioned checkpoint history per session.
//!
//! Layout under the output directory:
//!
//! ```text
//! <output_dir>/<session_id>/checkpoint_v0001.json.gz
//! <output_dir>/<session_id>/checkpoint_v0002.json.gz
//! ```
//!
//! Version assignment, the write and per-session retention happen under one
//! lock, so concurrent saves for the same session never share a version.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::analytics::CheckpointAnalytics;
use crate::analytics::rate;
use crate::analytics::round2;
use crate::checkpoint::CheckpointRecord;
use crate::checkpoint::CheckpointVersion;
use crate::checkpoint::SavedCheckpoint;
use crate::checkpoint::check_record_fields;
use crate::checkpoint::checkpoint_file_name;
use crate::checkpoint::parse_checkpoint_file_name;
use crate::clock::Clock;
use crate::codec;
use crate::config::CheckpointStoreConfig;
use crate::cursor::VersionCursor;
use crate::error::PersistError;
use crate::error::Result;
use crate::history::OperationLog;
use crate::history::OperationRecord;
use crate::session::validate_session_id;
use crate::storage::DurableStorage;

pub const BACKUP_PREFIX: &str = "checkpoint_backup_";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Default)]
struct Counters {
    saves: u64,
    loads: u64,
    validations: u64,
    cleanups: u64,
    bytes_saved: u64,
    bytes_compressed: u64,
}

struct CheckpointState {
    cursor: VersionCursor,
    counters: Counters,
    history: OperationLog,
}

/// A checkpoint file found on storage.
struct StoredVersion {
    version: u64,
    compressed: bool,
    path: PathBuf,
}

pub struct CheckpointStore {
    config: CheckpointStoreConfig,
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    state: Mutex<CheckpointState>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("output_dir", &self.config.output_dir)
            .field("max_versions_per_session", &self.config.max_versions_per_session)
            .finish_non_exhaustive()
    }
}

/// Extract the session id from `checkpoint_backup_{id}_{YYYYmmdd}_{HHMMSS}`.
pub fn parse_backup_name(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(BACKUP_PREFIX)?;
    let mut parts = rest.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;
    let session_id = parts.next()?;
    let all_digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(date, 8) || !all_digits(time, 6) || session_id.is_empty() {
        return None;
    }
    Some(session_id)
}

impl CheckpointStore {
    pub fn open(
        config: CheckpointStoreConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        storage
            .create_dir_all(&config.output_dir)
            .map_err(|e| PersistError::storage("creating checkpoint directory", &config.output_dir, e))?;
        let started_at = clock.now();
        info!(
            output_dir = %config.output_dir.display(),
            max_versions = config.max_versions_per_session,
            compression = config.compression_enabled,
            "checkpoint store opened"
        );
        Ok(Self {
            state: Mutex::new(CheckpointState {
                cursor: VersionCursor::new(config.max_tracked_sessions),
                counters: Counters::default(),
                history: OperationLog::new(config.history_size),
            }),
            config,
            storage,
            clock,
            started_at,
        })
    }

    pub fn config(&self) -> &CheckpointStoreConfig {
        &self.config
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.config.output_dir.join(session_id)
    }

    /// Checkpoint files in a session directory, lowest version first.
    fn scan(&self, session_id: &str) -> Vec<StoredVersion> {
        let Ok(children) = self.storage.list(&self.session_dir(session_id)) else {
            return Vec::new();
        };
        let mut versions: Vec<StoredVersion> = children
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let (version, compressed) = parse_checkpoint_file_name(name)?;
                Some(StoredVersion {
                    version,
                    compressed,
                    path,
                })
            })
            .collect();
        versions.sort_by_key(|v| v.version);
        versions
    }

    fn latest_version(&self, state: &mut CheckpointState, session_id: &str) -> u64 {
        if let Some(version) = state.cursor.get(session_id) {
            return version;
        }
        let latest = self.scan(session_id).last().map_or(0, |v| v.version);
        if latest > 0 {
            debug!(session_id, latest, "rebuilt version cursor from storage");
            state.cursor.set(session_id, latest);
        }
        latest
    }

    /// Compressed naming first, then plain.
    fn locate(&self, session_id: &str, version: u64) -> Option<(PathBuf, bool)> {
        let dir = self.session_dir(session_id);
        [true, false].into_iter().find_map(|compressed| {
            let path = dir.join(checkpoint_file_name(version, compressed));
            self.storage.exists(&path).then_some((path, compressed))
        })
    }

    /// Delete the lowest versions beyond the per-session cap.
    fn enforce_version_cap(&self, session_id: &str) {
        let versions = self.scan(session_id);
        let excess = versions
            .len()
            .saturating_sub(self.config.max_versions_per_session);
        for stale in versions.iter().take(excess) {
            match self.storage.remove_file(&stale.path) {
                Ok(()) => debug!(session_id, version = stale.version, "pruned old checkpoint"),
                Err(err) => warn!(
                    session_id,
                    version = stale.version,
                    error = %err,
                    "failed to prune old checkpoint"
                ),
            }
        }
    }

    /// Write the next version of `session_id`'s checkpoint.
    pub fn save(&self, session_id: &str, payload: Value) -> Result<SavedCheckpoint> {
        validate_session_id(session_id)?;
        let mut state = self.state.lock();
        let version = self.latest_version(&mut state, session_id) + 1;
        let dir = self.session_dir(session_id);
        self.storage
            .create_dir_all(&dir)
            .map_err(|e| PersistError::storage("creating session checkpoint directory", &dir, e))?;

        let now = self.clock.now();
        let compressed = self.config.compression_enabled;
        let record = CheckpointRecord {
            session_id: session_id.to_string(),
            version,
            timestamp: now,
            payload,
            compressed,
        };
        let location = dir.join(checkpoint_file_name(version, compressed));
        let encoded =
            codec::encode_checkpoint(&record).map_err(|e| PersistError::codec(&location, e))?;
        self.storage
            .write(&location, &encoded.bytes)
            .map_err(|e| PersistError::storage("writing checkpoint", &location, e))?;

        state.cursor.set(session_id, version);
        state.counters.saves += 1;
        state.counters.bytes_saved += encoded.raw_len as u64;
        if compressed {
            state.counters.bytes_compressed += encoded.bytes.len() as u64;
        }
        self.enforce_version_cap(session_id);
        state
            .history
            .record("save", Some(session_id), Some(format!("version {version}")), now);
        debug!(session_id, version, bytes = encoded.bytes.len(), "saved checkpoint");
        Ok(SavedCheckpoint { location, version })
    }

    /// Load a specific version. Missing or unreadable checkpoints yield `None`.
    pub fn load(&self, session_id: &str, version: u64) -> Option<CheckpointRecord> {
        validate_session_id(session_id).ok()?;
        let mut state = self.state.lock();
        let (path, compressed) = self.locate(session_id, version)?;
        let record = self.read_record(&path, compressed)?;
        state.counters.loads += 1;
        state.history.record(
            "load",
            Some(session_id),
            Some(format!("version {version}")),
            self.clock.now(),
        );
        Some(record)
    }

    /// Load the highest version present on storage.
    pub fn load_latest(&self, session_id: &str) -> Option<CheckpointRecord> {
        validate_session_id(session_id).ok()?;
        let latest = self.scan(session_id).pop()?;
        self.load(session_id, latest.version)
    }

    fn read_record(&self, path: &Path, compressed: bool) -> Option<CheckpointRecord> {
        let bytes = match self.storage.read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to read checkpoint");
                return None;
            }
        };
        match codec::decode_checkpoint(&bytes, compressed) {
            Ok(record) => Some(record),
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to decode checkpoint");
                None
            }
        }
    }

    /// All versions on storage, newest first.
    pub fn list_versions(&self, session_id: &str) -> Vec<CheckpointVersion> {
        if validate_session_id(session_id).is_err() {
            return Vec::new();
        }
        let _state = self.state.lock();
        let mut listed: Vec<CheckpointVersion> = self
            .scan(session_id)
            .into_iter()
            .filter_map(|stored| {
                let meta = self.storage.metadata(&stored.path).ok()?;
                Some(CheckpointVersion {
                    version: stored.version,
                    modified: meta.modified,
                    size_bytes: meta.size,
                    compressed: stored.compressed,
                    location: stored.path,
                })
            })
            .collect();
        listed.reverse();
        listed
    }

    /// Integrity check of one stored version. Never fails; problems are logged.
    pub fn validate(&self, session_id: &str, version: u64) -> bool {
        let mut state = self.state.lock();
        state.counters.validations += 1;
        let verdict = self.check(session_id, version);
        if let Err(reason) = verdict {
            warn!(session_id, version, reason, "checkpoint failed validation");
        }
        state.history.record(
            "validate",
            Some(session_id),
            Some(format!(
                "version {version}: {}",
                if verdict.is_ok() { "valid" } else { "invalid" }
            )),
            self.clock.now(),
        );
        verdict.is_ok()
    }

    fn check(&self, session_id: &str, version: u64) -> std::result::Result<(), &'static str> {
        validate_session_id(session_id).map_err(|_| "invalid session id")?;
        let (path, compressed) = self
            .locate(session_id, version)
            .ok_or("checkpoint not found")?;
        let bytes = self.storage.read(&path).map_err(|_| "unreadable")?;
        let value =
            codec::decode_checkpoint_value(&bytes, compressed).map_err(|_| "corrupt data")?;
        check_record_fields(&value, session_id, version)
    }

    /// Remove one version. Returns whether anything was deleted.
    pub fn delete(&self, session_id: &str, version: u64) -> bool {
        if validate_session_id(session_id).is_err() {
            return false;
        }
        let mut state = self.state.lock();
        let Some((path, _)) = self.locate(session_id, version) else {
            return false;
        };
        if let Err(err) = self.storage.remove_file(&path) {
            warn!(session_id, version, error = %err, "failed to delete checkpoint");
            return false;
        }
        state.history.record(
            "delete",
            Some(session_id),
            Some(format!("version {version}")),
            self.clock.now(),
        );
        true
    }

    pub fn exists(&self, session_id: &str) -> bool {
        validate_session_id(session_id).is_ok() && !self.scan(session_id).is_empty()
    }

    /// Delete every checkpoint last modified more than `retention` ago and
    /// drop session directories left empty. Returns the number deleted.
    pub fn cleanup(&self, retention: Duration) -> Result<usize> {
        if retention <= Duration::zero() {
            return Err(PersistError::InvalidArgument(
                "retention must be positive".into(),
            ));
        }
        let mut state = self.state.lock();
        let now = self.clock.now();
        let cutoff = now - retention;
        let root = &self.config.output_dir;
        let children = self
            .storage
            .list(root)
            .map_err(|e| PersistError::storage("listing checkpoint directory", root, e))?;

        let mut deleted = 0;
        for dir in children.into_iter().filter(|p| self.storage.is_dir(p)) {
            let Some(session_id) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for stored in self.scan(session_id) {
                let expired = self
                    .storage
                    .metadata(&stored.path)
                    .is_ok_and(|meta| meta.modified < cutoff);
                if !expired {
                    continue;
                }
                match self.storage.remove_file(&stored.path) {
                    Ok(()) => deleted += 1,
                    Err(err) => warn!(
                        session_id,
                        version = stored.version,
                        error = %err,
                        "failed to delete expired checkpoint"
                    ),
                }
            }
            // Cursor entries are kept: a version number is never reissued.
            if self.storage.list(&dir).is_ok_and(|rest| rest.is_empty()) {
                if let Err(err) = self.storage.remove_dir(&dir) {
                    warn!(
                        session_id,
                        error = %err,
                        "failed to remove empty checkpoint directory"
                    );
                }
            }
        }

        state.counters.cleanups += 1;
        state.history.record(
            "cleanup",
            None,
            Some(format!("deleted {deleted}")),
            now,
        );
        info!(deleted, retention_hours = retention.num_hours(), "checkpoint cleanup finished");
        Ok(deleted)
    }

    /// Copy a session's checkpoint directory into `destination`.
    pub fn backup(&self, session_id: &str, destination: &Path) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        let mut state = self.state.lock();
        if self.scan(session_id).is_empty() {
            return Err(PersistError::CheckpointNotFound(session_id.to_string()));
        }
        let now = self.clock.now();
        let name = format!(
            "{BACKUP_PREFIX}{session_id}_{}",
            now.format(BACKUP_TIMESTAMP_FORMAT)
        );
        let target = destination.join(name);
        self.storage
            .copy_dir_all(&self.session_dir(session_id), &target)
            .map_err(|e| PersistError::storage("backing up checkpoints", &target, e))?;
        state.history.record(
            "backup",
            Some(session_id),
            Some(target.display().to_string()),
            now,
        );
        info!(session_id, backup = %target.display(), "checkpoint backup created");
        Ok(target)
    }

    /// Replace a session's history with a backup made by [`Self::backup`].
    /// Returns the restored session id.
    ///
    /// The backup is copied into a hidden sibling directory and renamed into
    /// place. A failed copy leaves the previous history and cursor as they were.
    pub fn restore(&self, source: &Path) -> Result<String> {
        if !self.storage.is_dir(source) {
            return Err(PersistError::BackupNotFound(source.to_path_buf()));
        }
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PersistError::InvalidBackup(source.display().to_string()))?;
        let session_id = parse_backup_name(name)
            .filter(|id| validate_session_id(id).is_ok())
            .ok_or_else(|| PersistError::InvalidBackup(name.to_string()))?
            .to_string();

        let mut state = self.state.lock();
        let target = self.session_dir(&session_id);
        let staging = self.config.output_dir.join(format!(".restore_{session_id}"));
        let displaced = self.config.output_dir.join(format!(".replaced_{session_id}"));
        for leftover in [&staging, &displaced] {
            if self.storage.exists(leftover) {
                self.storage.remove_dir_all(leftover).map_err(|e| {
                    PersistError::storage("clearing stale restore directory", leftover.as_path(), e)
                })?;
            }
        }

        // The live history is only touched once the full copy is staged.
        if let Err(err) = self.storage.copy_dir_all(source, &staging) {
            self.discard_dir(&staging);
            return Err(PersistError::storage("staging restored checkpoints", &staging, err));
        }
        let had_history = self.storage.exists(&target);
        if had_history {
            if let Err(err) = self.storage.rename(&target, &displaced) {
                self.discard_dir(&staging);
                return Err(PersistError::storage("replacing checkpoint history", &target, err));
            }
        }
        if let Err(err) = self.storage.rename(&staging, &target) {
            if had_history {
                if let Err(undo) = self.storage.rename(&displaced, &target) {
                    error!(
                        session_id,
                        error = %undo,
                        kept_at = %displaced.display(),
                        "failed to put previous checkpoint history back"
                    );
                }
            }
            self.discard_dir(&staging);
            return Err(PersistError::storage("restoring checkpoints", &target, err));
        }
        if had_history {
            self.discard_dir(&displaced);
        }

        match self.scan(&session_id).last() {
            Some(latest) => state.cursor.set(&session_id, latest.version),
            None => state.cursor.remove(&session_id),
        }
        state.history.record(
            "restore",
            Some(session_id.as_str()),
            Some(source.display().to_string()),
            self.clock.now(),
        );
        info!(session_id, backup = %source.display(), "checkpoint history restored");
        Ok(session_id)
    }

    fn discard_dir(&self, dir: &Path) {
        if !self.storage.exists(dir) {
            return;
        }
        if let Err(err) = self.storage.remove_dir_all(dir) {
            warn!(dir = %dir.display(), error = %err, "failed to remove restore scratch directory");
        }
    }

    pub fn analytics(&self) -> CheckpointAnalytics {
        let state = self.state.lock();
        let now = self.clock.now();

        let mut sessions_with_checkpoints = 0;
        let mut total_versions = 0;
        let children = self.storage.list(&self.config.output_dir).unwrap_or_default();
        for dir in children.iter().filter(|p| self.storage.is_dir(p)) {
            let Some(session_id) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let count = self.scan(session_id).len();
            if count > 0 {
                sessions_with_checkpoints += 1;
                total_versions += count;
            }
        }

        let counters = &state.counters;
        let uptime = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let operations = counters.saves + counters.loads + counters.validations;
        let compression_ratio = if self.config.compression_enabled
            && counters.bytes_compressed > 0
            && counters.bytes_saved > 0
        {
            round2((1.0 - counters.bytes_compressed as f64 / counters.bytes_saved as f64) * 100.0)
        } else {
            0.0
        };
        let average_versions_per_session = if sessions_with_checkpoints > 0 {
            round2(total_versions as f64 / sessions_with_checkpoints as f64)
        } else {
            0.0
        };

        CheckpointAnalytics {
            total_saves: counters.saves,
            total_loads: counters.loads,
            total_validations: counters.validations,
            total_cleanups: counters.cleanups,
            sessions_with_checkpoints,
            total_versions,
            average_versions_per_session,
            bytes_saved: counters.bytes_saved,
            bytes_compressed: counters.bytes_compressed,
            compression_ratio,
            compression_enabled: self.config.compression_enabled,
            uptime_seconds: round2(uptime),
            operations_per_minute: rate(operations, uptime, 60.0),
            max_versions_per_session: self.config.max_versions_per_session,
            tracked_sessions: state.cursor.len(),
            generated_at: now,
        }
    }

    /// Recent operations, oldest first.
    pub fn history(&self) -> Vec<OperationRecord> {
        self.state.lock().history.entries()
    }
}
