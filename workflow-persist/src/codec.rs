//! Byte-level encoding of durable records.
//!
//! Session records are pretty-printed JSON. Checkpoint records are
//! pretty-printed JSON, optionally wrapped in gzip.

use std::io::Read;
use std::io::Write;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;

use crate::checkpoint::CheckpointRecord;
use crate::session::SessionRecord;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression: {0}")]
    Compression(#[from] std::io::Error),
}

/// Encoded bytes plus the size of the uncompressed serialization.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub raw_len: usize,
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn encode_session(record: &SessionRecord) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec_pretty(record)?)
}

pub fn decode_session(bytes: &[u8]) -> Result<SessionRecord, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serialize a checkpoint, compressing when `record.compressed` is set.
pub fn encode_checkpoint(record: &CheckpointRecord) -> Result<Encoded, CodecError> {
    let json = serde_json::to_vec_pretty(record)?;
    let raw_len = json.len();
    let bytes = if record.compressed {
        compress(&json)?
    } else {
        json
    };
    Ok(Encoded { bytes, raw_len })
}

/// Decode into an untyped value so callers can inspect individual fields.
pub fn decode_checkpoint_value(bytes: &[u8], compressed: bool) -> Result<Value, CodecError> {
    if compressed {
        Ok(serde_json::from_slice(&decompress(bytes)?)?)
    } else {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub fn decode_checkpoint(bytes: &[u8], compressed: bool) -> Result<CheckpointRecord, CodecError> {
    Ok(serde_json::from_value(decode_checkpoint_value(
        bytes, compressed,
    )?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(compressed: bool) -> CheckpointRecord {
        CheckpointRecord {
            session_id: "s1".into(),
            version: 7,
            timestamp: Utc::now(),
            payload: json!({"phase": 1, "notes": "x".repeat(512)}),
            compressed,
        }
    }

    #[test]
    fn test_compressed_checkpoint_is_gzip_and_smaller() {
        let encoded = encode_checkpoint(&record(true)).unwrap();
        assert_eq!(&encoded.bytes[..2], &[0x1f, 0x8b]);
        assert!(encoded.bytes.len() < encoded.raw_len);

        let decoded = decode_checkpoint(&encoded.bytes, true).unwrap();
        assert_eq!(decoded, record_with_time(true, decoded.timestamp));
    }

    fn record_with_time(compressed: bool, timestamp: chrono::DateTime<Utc>) -> CheckpointRecord {
        CheckpointRecord {
            timestamp,
            ..record(compressed)
        }
    }

    #[test]
    fn test_uncompressed_checkpoint_is_readable_json() {
        let original = record(false);
        let encoded = encode_checkpoint(&original).unwrap();
        assert_eq!(encoded.bytes.len(), encoded.raw_len);
        let text = String::from_utf8(encoded.bytes.clone()).unwrap();
        assert!(text.contains("\"session_id\": \"s1\""));
        assert_eq!(decode_checkpoint(&encoded.bytes, false).unwrap(), original);
    }

    #[test]
    fn test_truncated_gzip_fails_to_decode() {
        let encoded = encode_checkpoint(&record(true)).unwrap();
        let truncated = &encoded.bytes[..encoded.bytes.len() / 2];
        assert!(decode_checkpoint_value(truncated, true).is_err());
    }

    #[test]
    fn test_decode_session_rejects_garbage() {
        let err = decode_session(b"{ not json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
