use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::analytics::CheckpointAnalytics;
use crate::analytics::SessionAnalytics;
use crate::checkpoint_store::CheckpointStore;
use crate::error::PersistError;
use crate::error::Result;
use crate::history::OperationRecord;
use crate::session::SessionRecord;
use crate::session_store::SessionStore;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl FromStr for ExportFormat {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(PersistError::InvalidArgument(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

#[derive(Serialize)]
struct SessionExport<'a> {
    analytics: &'a SessionAnalytics,
    sessions: &'a [SessionRecord],
    exported_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct CheckpointExport<'a> {
    analytics: &'a CheckpointAnalytics,
    history: &'a [OperationRecord],
    exported_at: DateTime<Utc>,
}

/// Export analytics plus every resident session.
pub fn export_sessions(store: &SessionStore, format: ExportFormat) -> Result<String> {
    let analytics = store.analytics();
    let sessions = store.resident();
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&SessionExport {
            analytics: &analytics,
            sessions: &sessions,
            exported_at: analytics.generated_at,
        })?),
        ExportFormat::Csv => {
            let mut out = String::new();
            write_metrics_csv(&mut out, "=== Session Analytics ===", &analytics)?;
            out.push('\n');
            out.push_str("=== Sessions ===\n");
            let rows = sessions
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            write_records_csv(&mut out, &rows, "No sessions");
            Ok(out)
        }
        ExportFormat::Markdown => {
            let mut md = String::from("# Session Report\n\n");
            md.push_str(&session_summary_lines(&analytics).join("\n"));
            md.push_str("\n\n");
            if !analytics.top_tags.is_empty() {
                md.push_str("## Top Tags\n\n");
                for tag in &analytics.top_tags {
                    let _ = writeln!(md, "- {} ({})", tag.tag, tag.count);
                }
                md.push('\n');
            }
            md.push_str("## Sessions\n\n");
            if sessions.is_empty() {
                md.push_str("_No sessions._\n");
                return Ok(md);
            }
            md.push_str("| Session | Status | Task | Owner | Started | Duration (s) |\n");
            md.push_str("|---|---|---|---|---|---|\n");
            for record in &sessions {
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {} | {} | {} |",
                    record.session_id,
                    record.status,
                    record.task.as_deref().unwrap_or("-"),
                    record.owner.as_deref().unwrap_or("-"),
                    record
                        .started_at
                        .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                    record
                        .duration_seconds
                        .map_or_else(|| "-".to_string(), |d| format!("{d:.2}")),
                );
            }
            Ok(md)
        }
    }
}

/// Export checkpoint analytics plus the recent operation history.
pub fn export_checkpoints(store: &CheckpointStore, format: ExportFormat) -> Result<String> {
    let analytics = store.analytics();
    let history = store.history();
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&CheckpointExport {
            analytics: &analytics,
            history: &history,
            exported_at: analytics.generated_at,
        })?),
        ExportFormat::Csv => {
            let mut out = String::new();
            write_metrics_csv(&mut out, "=== Checkpoint Analytics ===", &analytics)?;
            out.push('\n');
            out.push_str("=== Operation History ===\n");
            let rows = history
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            write_records_csv(&mut out, &rows, "No history available");
            Ok(out)
        }
        ExportFormat::Markdown => {
            let mut md = String::from("# Checkpoint Report\n\n");
            md.push_str(&checkpoint_summary_lines(&analytics).join("\n"));
            md.push_str("\n\n## Operation History\n\n");
            if history.is_empty() {
                md.push_str("_No history available._\n");
                return Ok(md);
            }
            for entry in &history {
                let _ = write!(md, "- {} `{}`", entry.timestamp.to_rfc3339(), entry.operation);
                if let Some(session_id) = &entry.session_id {
                    let _ = write!(md, " {session_id}");
                }
                if let Some(detail) = &entry.detail {
                    let _ = write!(md, ": {detail}");
                }
                md.push('\n');
            }
            Ok(md)
        }
    }
}

fn session_summary_lines(a: &SessionAnalytics) -> Vec<String> {
    vec![
        format!("Total Sessions Created: {}", a.total_created),
        format!("Resident Sessions: {}", a.resident_sessions),
        format!("Running Sessions: {}", a.running_sessions),
        format!("Ended Sessions: {}", a.total_ended),
        format!("Archived Sessions: {}", a.total_archived),
        format!("Avg Duration: {:.1}s", a.average_duration_seconds),
        format!("Unique Tags: {}", a.unique_tags),
        format!("Sessions/Hour: {:.1}", a.sessions_per_hour),
        format!(
            "Persistence: {}",
            if a.persistence_enabled { "Enabled" } else { "Disabled" }
        ),
        format!("Uptime: {:.0}s", a.uptime_seconds),
    ]
}

fn checkpoint_summary_lines(a: &CheckpointAnalytics) -> Vec<String> {
    let mut lines = vec![
        format!("Sessions With Checkpoints: {}", a.sessions_with_checkpoints),
        format!("Total Versions: {}", a.total_versions),
        format!("Avg Versions/Session: {:.1}", a.average_versions_per_session),
        format!("Total Saves: {}", a.total_saves),
        format!("Total Loads: {}", a.total_loads),
        format!("Validations: {}", a.total_validations),
        format!("Cleanups: {}", a.total_cleanups),
        format!(
            "Compression: {}",
            if a.compression_enabled { "Enabled" } else { "Disabled" }
        ),
    ];
    if a.compression_enabled && a.compression_ratio > 0.0 {
        lines.push(format!("Compression Ratio: {:.1}%", a.compression_ratio));
    }
    lines.push(format!("Uptime: {:.0}s", a.uptime_seconds));
    lines
}

/// Human-readable summary of session analytics.
pub fn session_summary(analytics: &SessionAnalytics) -> String {
    let mut lines = vec!["=== Session Store Summary ===".to_string()];
    lines.extend(session_summary_lines(analytics));
    lines.join("\n")
}

/// Human-readable summary of checkpoint analytics.
pub fn checkpoint_summary(analytics: &CheckpointAnalytics) -> String {
    let mut lines = vec!["=== Checkpoint Store Summary ===".to_string()];
    lines.extend(checkpoint_summary_lines(analytics));
    lines.join("\n")
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        other => csv_field(&other.to_string()),
    }
}

fn push_csv_row<I, S>(out: &mut String, cells: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let row: Vec<String> = cells.into_iter().map(|c| c.as_ref().to_string()).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Scalar metrics as `Metric,Value` rows. Nested maps and lists are skipped.
fn write_metrics_csv<T: Serialize>(out: &mut String, title: &str, metrics: &T) -> Result<()> {
    out.push_str(title);
    out.push('\n');
    push_csv_row(out, ["Metric", "Value"]);
    if let Value::Object(fields) = serde_json::to_value(metrics)? {
        for (key, value) in &fields {
            if value.is_object() || value.is_array() {
                continue;
            }
            push_csv_row(out, [csv_field(key), csv_value(value)]);
        }
    }
    Ok(())
}

/// One row per record under a header of every field name, sorted.
fn write_records_csv(out: &mut String, rows: &[Value], empty: &str) {
    let headers: BTreeSet<&str> = rows
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|fields| fields.keys().map(String::as_str))
        .collect();
    if headers.is_empty() {
        push_csv_row(out, [empty]);
        return;
    }
    push_csv_row(out, headers.iter().copied().map(csv_field));
    for row in rows {
        push_csv_row(
            out,
            headers
                .iter()
                .map(|h| row.get(*h).map(csv_value).unwrap_or_default()),
        );
    }
}
