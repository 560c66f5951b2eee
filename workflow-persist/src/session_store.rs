//! Bounded registry of session records with durable overflow.
//!
//! Resident records live in an LRU table capped at `max_sessions`. When the
//! table is full the least recently used record is written to storage and
//! dropped from memory. Reads that miss the table fall back to the durable
//! copy but never repopulate the table.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::analytics::SessionAnalytics;
use crate::analytics::rate;
use crate::analytics::round2;
use crate::analytics::top_tags;
use crate::clock::Clock;
use crate::codec;
use crate::config::SessionStoreConfig;
use crate::error::PersistError;
use crate::error::Result;
use crate::executor::ExecutorStatus;
use crate::executor::SessionExecutor;
use crate::history::OperationLog;
use crate::history::OperationRecord;
use crate::search::SessionFilter;
use crate::session::NewSession;
use crate::session::SessionRecord;
use crate::session::SessionStatus;
use crate::session::SessionUpdate;
use crate::session::generate_session_id;
use crate::session::validate_session_id;
use crate::storage::DurableStorage;

pub const ARCHIVE_DIR: &str = "archived";
const SESSION_FILE_PREFIX: &str = "session_";
const SESSION_FILE_SUFFIX: &str = ".json";

pub fn session_file_name(session_id: &str) -> String {
    format!("{SESSION_FILE_PREFIX}{session_id}{SESSION_FILE_SUFFIX}")
}

fn session_id_from_file_name(name: &str) -> Option<&str> {
    let id = name
        .strip_prefix(SESSION_FILE_PREFIX)?
        .strip_suffix(SESSION_FILE_SUFFIX)?;
    (!id.is_empty()).then_some(id)
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    ended: u64,
    archived: u64,
}

struct SessionState {
    sessions: LruCache<String, SessionRecord>,
    /// tag -> ids of resident sessions carrying it.
    tag_index: HashMap<String, BTreeSet<String>>,
    executors: HashMap<String, Arc<dyn SessionExecutor>>,
    counters: Counters,
    history: OperationLog,
}

impl SessionState {
    fn index_tags<'a>(&mut self, session_id: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(session_id.to_string());
        }
    }

    /// Drop a resident record together with its tags and executor.
    fn forget(&mut self, session_id: &str) -> Option<SessionRecord> {
        let record = self.sessions.pop(session_id)?;
        for tag in &record.tags {
            if let Some(ids) = self.tag_index.get_mut(tag) {
                ids.remove(session_id);
                if ids.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        self.executors.remove(session_id);
        Some(record)
    }
}

pub struct SessionStore {
    config: SessionStoreConfig,
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("max_sessions", &self.config.max_sessions)
            .field("persistence_enabled", &self.config.persistence_enabled)
            .field("persistence_dir", &self.config.persistence_dir)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn open(
        config: SessionStoreConfig,
        storage: Arc<dyn DurableStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_sessions).ok_or_else(|| {
            PersistError::InvalidConfig("max_sessions must be at least 1".into())
        })?;
        if config.persistence_enabled {
            storage
                .create_dir_all(&config.persistence_dir)
                .map_err(|e| {
                    PersistError::storage(
                        "creating session directory",
                        &config.persistence_dir,
                        e,
                    )
                })?;
        }
        let started_at = clock.now();
        info!(
            max_sessions = config.max_sessions,
            persistence = config.persistence_enabled,
            dir = %config.persistence_dir.display(),
            "session store opened"
        );
        Ok(Self {
            state: Mutex::new(SessionState {
                sessions: LruCache::new(capacity),
                tag_index: HashMap::new(),
                executors: HashMap::new(),
                counters: Counters::default(),
                history: OperationLog::new(config.history_size),
            }),
            config,
            storage,
            clock,
            started_at,
        })
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.max_sessions
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Where `persist` writes the durable copy of `session_id`.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.config
            .persistence_dir
            .join(session_file_name(session_id))
    }

    fn write_record(&self, dir: &Path, record: &SessionRecord) -> Result<PathBuf> {
        self.storage
            .create_dir_all(dir)
            .map_err(|e| PersistError::storage("creating session directory", dir, e))?;
        let path = dir.join(session_file_name(&record.session_id));
        let bytes = codec::encode_session(record).map_err(|e| PersistError::codec(&path, e))?;
        self.storage
            .write(&path, &bytes)
            .map_err(|e| PersistError::storage("writing session file", &path, e))?;
        Ok(path)
    }

    fn write_durable(&self, record: &SessionRecord) -> Result<PathBuf> {
        self.write_record(&self.config.persistence_dir, record)
    }

    /// Best-effort write used by eviction and cleanup.
    fn write_durable_logged(&self, record: &SessionRecord, reason: &'static str) {
        if !self.config.persistence_enabled {
            return;
        }
        if let Err(err) = self.write_durable(record) {
            warn!(
                session_id = %record.session_id,
                reason,
                error = %err,
                "failed to persist session; in-memory copy dropped"
            );
        }
    }

    fn read_path(&self, path: &Path) -> Option<SessionRecord> {
        let bytes = match self.storage.read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to read session file");
                return None;
            }
        };
        match codec::decode_session(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to decode session file");
                None
            }
        }
    }

    fn read_durable(&self, session_id: &str) -> Option<SessionRecord> {
        if !self.config.persistence_enabled {
            return None;
        }
        let path = self.session_path(session_id);
        if !self.storage.exists(&path) {
            return None;
        }
        self.read_path(&path)
    }

    fn evict_lru(&self, state: &mut SessionState) {
        let Some((session_id, _)) = state.sessions.peek_lru() else {
            return;
        };
        let session_id = session_id.clone();
        if let Some(record) = state.forget(&session_id) {
            self.write_durable_logged(&record, "eviction");
            debug!(session_id, "evicted least recently used session");
        }
    }

    /// Register a new session and return its id.
    pub fn create(&self, new: NewSession) -> Result<String> {
        let session_id = new.id.unwrap_or_else(generate_session_id);
        validate_session_id(&session_id)?;

        let mut state = self.state.lock();
        if state.sessions.contains(&session_id)
            || self
                .read_durable(&session_id)
                .is_some_and(|record| record.status.is_active())
        {
            return Err(PersistError::DuplicateId(session_id));
        }

        let now = self.clock.now();
        let mut record = SessionRecord::new(session_id.clone(), now);
        record.task = new.task;
        record.owner = new.owner;
        record.metadata = new.metadata;
        record.parent_id = new.parent_id;

        if self.config.persistence_enabled {
            self.write_durable(&record)?;
        }
        if state.sessions.len() >= self.config.max_sessions {
            self.evict_lru(&mut state);
        }
        if let Some(parent_id) = &record.parent_id {
            if let Some(parent) = state.sessions.peek_mut(parent_id) {
                parent.child_ids.push(session_id.clone());
            }
        }
        state.sessions.put(session_id.clone(), record);
        state.counters.created += 1;
        state
            .history
            .record("create", Some(session_id.as_str()), None, now);
        info!(session_id, "session created");
        Ok(session_id)
    }

    /// Resident copy (promoted to most recently used) or, failing that, the
    /// durable copy. The durable copy is not brought back into memory.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let mut state = self.state.lock();
        if let Some(record) = state.sessions.get(session_id) {
            return Some(record.clone());
        }
        drop(state);
        validate_session_id(session_id).ok()?;
        self.read_durable(session_id)
    }

    /// Apply a caller-driven change. Durable-only records are rewritten in place.
    pub fn update(&self, session_id: &str, update: SessionUpdate) -> Result<SessionRecord> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let ends = update.status.is_some_and(SessionStatus::is_terminal);

        let updated = if let Some(record) = state.sessions.get_mut(session_id) {
            update.apply(record, now)?;
            record.clone()
        } else {
            let mut record = self
                .read_durable(session_id)
                .ok_or_else(|| PersistError::SessionNotFound(session_id.to_string()))?;
            update.apply(&mut record, now)?;
            self.write_durable(&record)?;
            record
        };

        if ends {
            state.counters.ended += 1;
        }
        state.history.record(
            "update",
            Some(session_id),
            Some(updated.status.to_string()),
            now,
        );
        debug!(session_id, status = %updated.status, "session updated");
        Ok(updated)
    }

    /// Move a session to a terminal status and persist it.
    pub fn end(&self, session_id: &str, status: SessionStatus) -> Result<SessionRecord> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let mut ended = match state.sessions.get(session_id).cloned() {
            Some(record) => record,
            None => self
                .read_durable(session_id)
                .ok_or_else(|| PersistError::SessionNotFound(session_id.to_string()))?,
        };
        // Nothing changes in memory until the durable write has succeeded.
        ended.finish(status, now)?;
        if self.config.persistence_enabled {
            self.write_durable(&ended)?;
        }
        if let Some(record) = state.sessions.peek_mut(session_id) {
            *record = ended.clone();
        }

        state.counters.ended += 1;
        state
            .history
            .record("end", Some(session_id), Some(status.to_string()), now);
        info!(
            session_id,
            %status,
            duration_seconds = ended.duration_seconds,
            "session ended"
        );
        Ok(ended)
    }

    /// Add tags to a session. Empty tags are ignored; re-adding is a no-op.
    pub fn tag<I, S>(&self, session_id: &str, tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags
            .into_iter()
            .map(Into::into)
            .filter(|tag| !tag.trim().is_empty())
            .collect();

        let mut state = self.state.lock();
        if let Some(record) = state.sessions.get_mut(session_id) {
            record.tags.extend(tags.iter().cloned());
            state.index_tags(session_id, &tags);
        } else {
            let mut record = self
                .read_durable(session_id)
                .ok_or_else(|| PersistError::SessionNotFound(session_id.to_string()))?;
            record.tags.extend(tags.iter().cloned());
            self.write_durable(&record)?;
        }
        state.history.record(
            "tag",
            Some(session_id),
            Some(tags.join(",")),
            self.clock.now(),
        );
        Ok(())
    }

    /// Sessions matching `filter`, from memory and durable storage.
    ///
    /// The resident copy wins when a session is in both places. Results are
    /// ordered by creation time.
    pub fn search(&self, filter: &SessionFilter) -> Vec<SessionRecord> {
        let state = self.state.lock();
        let mut seen: HashSet<String> = HashSet::new();
        let mut found: Vec<SessionRecord> = Vec::new();
        for (session_id, record) in state.sessions.iter() {
            seen.insert(session_id.clone());
            if filter.matches(record) {
                found.push(record.clone());
            }
        }

        if self.config.persistence_enabled {
            let dir = &self.config.persistence_dir;
            match self.storage.list(dir) {
                Ok(paths) => {
                    for path in paths {
                        let Some(session_id) = path
                            .file_name()
                            .and_then(|name| name.to_str())
                            .and_then(session_id_from_file_name)
                        else {
                            continue;
                        };
                        if seen.contains(session_id) || self.storage.is_dir(&path) {
                            continue;
                        }
                        if let Some(record) = self.read_path(&path) {
                            if filter.matches(&record) {
                                found.push(record);
                            }
                        }
                    }
                }
                Err(err) => warn!(dir = %dir.display(), error = %err, "failed to scan session directory"),
            }
        }

        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        found
    }

    /// Write a session to durable storage and drop it from memory.
    ///
    /// Without persistence the record goes to the `archived` directory.
    pub fn archive(&self, session_id: &str) -> Result<PathBuf> {
        let mut state = self.state.lock();
        let Some(record) = state.sessions.peek(session_id).cloned() else {
            if validate_session_id(session_id).is_ok() && self.config.persistence_enabled {
                let path = self.session_path(session_id);
                if self.storage.exists(&path) {
                    return Ok(path);
                }
            }
            return Err(PersistError::SessionNotFound(session_id.to_string()));
        };

        let location = if self.config.persistence_enabled {
            self.write_durable(&record)?
        } else {
            let dir = self.config.persistence_dir.join(ARCHIVE_DIR);
            self.write_record(&dir, &record)?
        };
        state.forget(session_id);
        state.counters.archived += 1;
        state.history.record(
            "archive",
            Some(session_id),
            Some(location.display().to_string()),
            self.clock.now(),
        );
        info!(session_id, location = %location.display(), "session archived");
        Ok(location)
    }

    /// Drop resident sessions created before `now - older_than` (persisting
    /// them first) and delete durable files last written before the cutoff.
    /// Returns the number of records removed.
    pub fn cleanup(&self, older_than: Duration) -> Result<usize> {
        if older_than <= Duration::zero() {
            return Err(PersistError::InvalidArgument(
                "cleanup age must be positive".into(),
            ));
        }
        let mut state = self.state.lock();
        let now = self.clock.now();
        let cutoff = now - older_than;

        let stale: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, record)| record.created_at < cutoff)
            .map(|(session_id, _)| session_id.clone())
            .collect();
        let mut removed = 0;
        for session_id in &stale {
            if let Some(record) = state.forget(session_id) {
                self.write_durable_logged(&record, "cleanup");
                removed += 1;
            }
        }

        if self.config.persistence_enabled {
            let dir = &self.config.persistence_dir;
            let paths = self.storage.list(dir).unwrap_or_else(|err| {
                warn!(dir = %dir.display(), error = %err, "failed to scan session directory");
                Vec::new()
            });
            for path in paths {
                let is_session_file = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(session_id_from_file_name)
                    .is_some();
                let expired = self
                    .storage
                    .metadata(&path)
                    .is_ok_and(|meta| !meta.is_dir && meta.modified < cutoff);
                if !is_session_file || !expired {
                    continue;
                }
                match self.storage.remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to delete expired session file"
                    ),
                }
            }
        }

        state
            .history
            .record("cleanup", None, Some(format!("removed {removed}")), now);
        info!(removed, older_than_hours = older_than.num_hours(), "session cleanup finished");
        Ok(removed)
    }

    /// Write the resident copy of a session to durable storage.
    pub fn persist(&self, session_id: &str) -> Result<PathBuf> {
        if !self.config.persistence_enabled {
            return Err(PersistError::PersistenceDisabled);
        }
        let mut state = self.state.lock();
        let record = state
            .sessions
            .peek(session_id)
            .cloned()
            .ok_or_else(|| PersistError::SessionNotFound(session_id.to_string()))?;
        let path = self.write_durable(&record)?;
        state
            .history
            .record("persist", Some(session_id), None, self.clock.now());
        Ok(path)
    }

    /// Read the durable copy of a session, ignoring any resident copy.
    pub fn load_persisted(&self, session_id: &str) -> Option<SessionRecord> {
        validate_session_id(session_id).ok()?;
        let _state = self.state.lock();
        self.read_durable(session_id)
    }

    /// Resident sessions that are still active.
    pub fn list_active(&self) -> Vec<SessionRecord> {
        let state = self.state.lock();
        state
            .sessions
            .iter()
            .filter(|(_, record)| record.status.is_active())
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn register_executor(
        &self,
        session_id: &str,
        executor: Arc<dyn SessionExecutor>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.sessions.contains(session_id) {
            return Err(PersistError::SessionNotFound(session_id.to_string()));
        }
        state.executors.insert(session_id.to_string(), executor);
        Ok(())
    }

    fn executor_for(&self, session_id: &str) -> Result<Arc<dyn SessionExecutor>> {
        self.state
            .lock()
            .executors
            .get(session_id)
            .cloned()
            .ok_or_else(|| PersistError::NoExecutor(session_id.to_string()))
    }

    /// Forward a message to the session's executor and record it as the
    /// session's last message.
    pub fn send_message(&self, session_id: &str, message: &str) -> Result<()> {
        let executor = self.executor_for(session_id)?;
        executor
            .send_message(message)
            .map_err(|err| PersistError::Executor {
                session_id: session_id.to_string(),
                message: err.to_string(),
            })?;

        let mut state = self.state.lock();
        if let Some(record) = state.sessions.peek_mut(session_id) {
            record.last_message = Some(message.to_string());
        }
        state
            .history
            .record("send_message", Some(session_id), None, self.clock.now());
        Ok(())
    }

    /// Ask the session's executor to stop. The session's status is left to
    /// the caller, who ends it once the executor has wound down.
    pub fn stop(&self, session_id: &str) -> Result<()> {
        let executor = self.executor_for(session_id)?;
        executor
            .request_stop()
            .map_err(|err| PersistError::Executor {
                session_id: session_id.to_string(),
                message: err.to_string(),
            })?;
        self.state
            .lock()
            .history
            .record("stop", Some(session_id), None, self.clock.now());
        Ok(())
    }

    pub fn executor_status(&self, session_id: &str) -> Option<ExecutorStatus> {
        let executor = self.executor_for(session_id).ok()?;
        Some(executor.status())
    }

    pub fn analytics(&self) -> SessionAnalytics {
        let state = self.state.lock();
        let now = self.clock.now();

        let mut by_status = std::collections::BTreeMap::new();
        let mut by_owner = std::collections::BTreeMap::new();
        let mut durations = Vec::new();
        let mut running_sessions = 0;
        for (_, record) in state.sessions.iter() {
            *by_status.entry(record.status.to_string()).or_insert(0) += 1;
            let owner = record.owner.clone().unwrap_or_else(|| "unknown".into());
            *by_owner.entry(owner).or_insert(0) += 1;
            if let Some(duration) = record.duration_seconds {
                durations.push(duration);
            }
            if record.status.is_active() {
                running_sessions += 1;
            }
        }
        let average_duration_seconds = if durations.is_empty() {
            0.0
        } else {
            round2(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        let tag_counts: HashMap<&str, usize> = state
            .tag_index
            .iter()
            .map(|(tag, ids)| (tag.as_str(), ids.len()))
            .collect();
        let unique_tags = tag_counts.len();
        let uptime = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        SessionAnalytics {
            total_created: state.counters.created,
            total_ended: state.counters.ended,
            total_archived: state.counters.archived,
            resident_sessions: state.sessions.len(),
            running_sessions,
            by_status,
            by_owner,
            top_tags: top_tags(tag_counts, self.config.top_tags),
            unique_tags,
            average_duration_seconds,
            uptime_seconds: round2(uptime),
            sessions_per_hour: rate(state.counters.created, uptime, 3600.0),
            max_sessions: self.config.max_sessions,
            persistence_enabled: self.config.persistence_enabled,
            generated_at: now,
        }
    }

    /// Resident records, most recently used first.
    pub fn resident(&self) -> Vec<SessionRecord> {
        let state = self.state.lock();
        state.sessions.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Recent operations, oldest first.
    pub fn history(&self) -> Vec<OperationRecord> {
        self.state.lock().history.entries()
    }
}
