//! Point-in-time statistics reported by the stores.

use std::collections::BTreeMap;
use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

/// A tag and the number of resident sessions carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAnalytics {
    pub total_created: u64,
    pub total_ended: u64,
    pub total_archived: u64,
    pub resident_sessions: usize,
    /// Resident sessions in an active status.
    pub running_sessions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_owner: BTreeMap<String, usize>,
    pub top_tags: Vec<TagCount>,
    pub unique_tags: usize,
    /// Mean `duration_seconds` over resident sessions that have one.
    pub average_duration_seconds: f64,
    pub uptime_seconds: f64,
    pub sessions_per_hour: f64,
    pub max_sessions: usize,
    pub persistence_enabled: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointAnalytics {
    pub total_saves: u64,
    pub total_loads: u64,
    pub total_validations: u64,
    pub total_cleanups: u64,
    pub sessions_with_checkpoints: usize,
    pub total_versions: usize,
    pub average_versions_per_session: f64,
    /// Uncompressed bytes serialized by `save`.
    pub bytes_saved: u64,
    /// Bytes actually written for compressed checkpoints.
    pub bytes_compressed: u64,
    /// Percentage of space saved by compression, 0 when nothing was compressed.
    pub compression_ratio: f64,
    pub compression_enabled: bool,
    pub uptime_seconds: f64,
    pub operations_per_minute: f64,
    pub max_versions_per_session: usize,
    pub tracked_sessions: usize,
    pub generated_at: DateTime<Utc>,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `count / seconds` scaled to `per` seconds; 0 when no time has passed.
pub(crate) fn rate(count: u64, seconds: f64, per: f64) -> f64 {
    if seconds > 0.0 {
        round2(count as f64 / seconds * per)
    } else {
        0.0
    }
}

/// Highest counts first, ties broken alphabetically.
pub(crate) fn top_tags(counts: HashMap<&str, usize>, limit: usize) -> Vec<TagCount> {
    let mut counts: Vec<(&str, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    counts
        .into_iter()
        .take(limit)
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect()
}
