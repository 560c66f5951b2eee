use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

pub const CHECKPOINT_FILE_PREFIX: &str = "checkpoint_v";
pub const CHECKPOINT_EXTENSION: &str = ".json";
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// An immutable, versioned snapshot of a session's working state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub session_id: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    #[serde(default)]
    pub compressed: bool,
}

/// Where a checkpoint landed and which version it was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedCheckpoint {
    pub location: PathBuf,
    pub version: u64,
}

/// One entry of [`crate::CheckpointStore::list_versions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointVersion {
    pub version: u64,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
    pub compressed: bool,
    pub location: PathBuf,
}

/// `checkpoint_v0007.json` or `checkpoint_v0007.json.gz`.
pub fn checkpoint_file_name(version: u64, compressed: bool) -> String {
    let suffix = if compressed { COMPRESSED_SUFFIX } else { "" };
    format!("{CHECKPOINT_FILE_PREFIX}{version:04}{CHECKPOINT_EXTENSION}{suffix}")
}

/// Parse a checkpoint file name back into `(version, compressed)`.
pub fn parse_checkpoint_file_name(name: &str) -> Option<(u64, bool)> {
    let rest = name.strip_prefix(CHECKPOINT_FILE_PREFIX)?;
    let (digits, compressed) = match rest.strip_suffix(COMPRESSED_SUFFIX) {
        Some(rest) => (rest.strip_suffix(CHECKPOINT_EXTENSION)?, true),
        None => (rest.strip_suffix(CHECKPOINT_EXTENSION)?, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version = digits.parse::<u64>().ok()?;
    (version > 0).then_some((version, compressed))
}

/// Structural check of a decoded checkpoint against the requested identity.
///
/// Returns the reason on failure so callers can log it.
pub(crate) fn check_record_fields(
    value: &Value,
    session_id: &str,
    version: u64,
) -> Result<(), &'static str> {
    for field in ["session_id", "version", "timestamp"] {
        if value.get(field).is_none() {
            return Err("missing required field");
        }
    }
    if value["session_id"].as_str() != Some(session_id) {
        return Err("session_id mismatch");
    }
    if value["version"].as_u64() != Some(version) {
        return Err("version mismatch");
    }
    let timestamp = value["timestamp"].as_str().ok_or("timestamp is not a string")?;
    DateTime::parse_from_rfc3339(timestamp).map_err(|_| "invalid timestamp format")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_file_names_are_zero_padded() {
        assert_eq!(checkpoint_file_name(1, false), "checkpoint_v0001.json");
        assert_eq!(checkpoint_file_name(42, true), "checkpoint_v0042.json.gz");
        assert_eq!(checkpoint_file_name(12345, false), "checkpoint_v12345.json");
    }

    #[test]
    fn test_parse_file_names() {
        assert_eq!(parse_checkpoint_file_name("checkpoint_v0001.json"), Some((1, false)));
        assert_eq!(parse_checkpoint_file_name("checkpoint_v0042.json.gz"), Some((42, true)));
        assert_eq!(parse_checkpoint_file_name("checkpoint_v12345.json"), Some((12345, false)));
        assert_eq!(parse_checkpoint_file_name("checkpoint_v0000.json"), None);
        assert_eq!(parse_checkpoint_file_name("checkpoint_vabc.json"), None);
        assert_eq!(parse_checkpoint_file_name("checkpoint_v0001.txt"), None);
        assert_eq!(parse_checkpoint_file_name(".checkpoint_v0001.json.tmp"), None);
        assert_eq!(parse_checkpoint_file_name("session_a.json"), None);
    }

    #[test]
    fn test_check_record_fields() {
        let good = json!({
            "session_id": "s1",
            "version": 3,
            "timestamp": "2026-03-01T10:00:00Z",
            "payload": {}
        });
        assert_eq!(check_record_fields(&good, "s1", 3), Ok(()));
        assert_eq!(check_record_fields(&good, "s2", 3), Err("session_id mismatch"));
        assert_eq!(check_record_fields(&good, "s1", 4), Err("version mismatch"));

        let missing = json!({"session_id": "s1", "version": 3});
        assert_eq!(
            check_record_fields(&missing, "s1", 3),
            Err("missing required field")
        );

        let bad_time = json!({"session_id": "s1", "version": 3, "timestamp": "yesterday"});
        assert_eq!(
            check_record_fields(&bad_time, "s1", 3),
            Err("invalid timestamp format")
        );
    }
}
