use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::PersistError;
use crate::error::Result;

/// Prefix for generated session ids.
pub const SESSION_ID_PREFIX: &str = "sdk-";

/// Lifecycle state of a tracked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Starting,
    Running,
    Paused,
    Completing,
    Completed,
    Failed,
    Terminated,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 8] = [
        Self::Created,
        Self::Starting,
        Self::Running,
        Self::Paused,
        Self::Completing,
        Self::Completed,
        Self::Failed,
        Self::Terminated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Starting | Self::Running | Self::Paused
        )
    }

    // Running and Paused share a rank so a session can toggle between them.
    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Starting => 1,
            Self::Running | Self::Paused => 2,
            Self::Completing => 3,
            Self::Completed | Self::Failed | Self::Terminated => 4,
        }
    }

    /// Transitions never move backwards and never leave a terminal state.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for SessionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// A tracked unit of orchestration work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Present only once both `started_at` and `ended_at` are set.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
}

impl SessionRecord {
    /// A freshly registered session. New sessions start out running.
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            task: None,
            owner: None,
            status: SessionStatus::Running,
            created_at: now,
            started_at: Some(now),
            ended_at: None,
            duration_seconds: None,
            metadata: BTreeMap::new(),
            tags: BTreeSet::new(),
            last_message: None,
            parent_id: None,
            child_ids: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, enforcing monotonic transitions.
    pub fn transition(&mut self, next: SessionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PersistError::InvalidTransition {
                session_id: self.session_id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next == SessionStatus::Starting && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Move to a terminal status, stamping the end time and duration.
    pub fn finish(&mut self, status: SessionStatus, now: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(PersistError::InvalidTransition {
                session_id: self.session_id.clone(),
                from: self.status,
                to: status,
            });
        }
        self.transition(status, now)?;
        self.ended_at = Some(now);
        self.duration_seconds = self.started_at.map(|started| {
            let millis = (now - started).num_milliseconds().max(0);
            (millis as f64 / 10.0).round() / 100.0
        });
        Ok(())
    }
}

/// Input for [`crate::SessionStore::create`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub id: Option<String>,
    pub task: Option<String>,
    pub owner: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub parent_id: Option<String>,
}

impl NewSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Caller-driven mutation of a session: status, message, metadata.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub message: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn apply(self, record: &mut SessionRecord, now: DateTime<Utc>) -> Result<()> {
        if let Some(status) = self.status {
            if status.is_terminal() {
                record.finish(status, now)?;
            } else {
                record.transition(status, now)?;
            }
        }
        if let Some(message) = self.message {
            record.last_message = Some(message);
        }
        record.metadata.extend(self.metadata);
        Ok(())
    }
}

/// Generate a collision-resistant session id, e.g. `sdk-1f0c9a4be2d7`.
pub fn generate_session_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{SESSION_ID_PREFIX}{}", &hex[..12])
}

/// Session ids become file and directory names, so they must be a single
/// plain path component.
pub fn validate_session_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| c == '/' || c == '\\' || c == '\0');
    if bad {
        return Err(PersistError::InvalidId(id.to_string()));
    }
    Ok(())
}
