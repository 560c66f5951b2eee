use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;

use crate::session::SessionRecord;
use crate::session::SessionStatus;

/// Criteria for [`crate::SessionStore::search`]. Every criterion that is set
/// must match; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    /// Case-insensitive substring of the task.
    pub task: Option<String>,
    /// Case-insensitive substring of the owner.
    pub owner: Option<String>,
    /// Matches when the session carries at least one of these tags.
    pub tags: BTreeSet<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn task(mut self, needle: impl Into<String>) -> Self {
        self.task = Some(needle.into());
        self
    }

    pub fn owner(mut self, needle: impl Into<String>) -> Self {
        self.owner = Some(needle.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn started_after(mut self, at: DateTime<Utc>) -> Self {
        self.started_after = Some(at);
        self
    }

    pub fn started_before(mut self, at: DateTime<Utc>) -> Self {
        self.started_before = Some(at);
        self
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if self
            .task
            .as_deref()
            .is_some_and(|needle| !contains_ignore_case(record.task.as_deref(), needle))
        {
            return false;
        }
        if self
            .owner
            .as_deref()
            .is_some_and(|needle| !contains_ignore_case(record.owner.as_deref(), needle))
        {
            return false;
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&record.tags) {
            return false;
        }
        if self.started_after.is_some() || self.started_before.is_some() {
            let Some(started) = record.started_at else {
                return false;
            };
            if self.started_after.is_some_and(|after| started < after) {
                return false;
            }
            if self.started_before.is_some_and(|before| started > before) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> SessionRecord {
        let mut record = SessionRecord::new("s1", Utc::now());
        record.task = Some("Build Report".into());
        record.owner = Some("Planner".into());
        record.tags.insert("ci".into());
        record.tags.insert("nightly".into());
        record
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(SessionFilter::new().matches(&record()));
    }

    #[test]
    fn test_substring_filters_ignore_case() {
        let r = record();
        assert!(SessionFilter::new().task("build").matches(&r));
        assert!(SessionFilter::new().owner("PLAN").matches(&r));
        assert!(!SessionFilter::new().task("deploy").matches(&r));

        let mut no_task = record();
        no_task.task = None;
        assert!(!SessionFilter::new().task("build").matches(&no_task));
    }

    #[test]
    fn test_tags_match_on_any_overlap() {
        let r = record();
        assert!(SessionFilter::new().tag("ci").tag("other").matches(&r));
        assert!(!SessionFilter::new().tag("other").matches(&r));
    }

    #[test]
    fn test_all_criteria_must_hold() {
        let r = record();
        let filter = SessionFilter::new()
            .status(SessionStatus::Running)
            .task("report")
            .tag("ci");
        assert!(filter.matches(&r));
        assert!(!filter.status(SessionStatus::Paused).matches(&r));
    }

    #[test]
    fn test_start_range_is_inclusive() {
        let r = record();
        let Some(started) = r.started_at else {
            panic!("new records have a start time");
        };
        assert!(
            SessionFilter::new()
                .started_after(started)
                .started_before(started)
                .matches(&r)
        );
        assert!(
            !SessionFilter::new()
                .started_after(started + Duration::seconds(1))
                .matches(&r)
        );

        let mut unstarted = record();
        unstarted.started_at = None;
        assert!(
            !SessionFilter::new()
                .started_before(started)
                .matches(&unstarted)
        );
    }
}
