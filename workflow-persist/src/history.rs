use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A single entry in a store's operation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Bounded operation log. The oldest entry is dropped once full.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: VecDeque<OperationRecord>,
    max_entries: usize,
}

impl OperationLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
        }
    }

    pub fn record(
        &mut self,
        operation: &str,
        session_id: Option<&str>,
        detail: Option<String>,
        timestamp: DateTime<Utc>,
    ) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(OperationRecord {
            operation: operation.to_string(),
            session_id: session_id.map(str::to_string),
            timestamp,
            detail,
        });
    }

    /// Entries oldest-first.
    pub fn entries(&self) -> Vec<OperationRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
