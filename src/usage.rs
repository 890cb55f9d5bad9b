use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EntryParseError, QueueError};
use crate::queue::UsageQueue;

/// A single usage event produced by the gateway and buffered on the queue
/// until the flusher persists it to the `usage_log` table.
///
/// The wire format is one JSON object per queued item. Every field is
/// required and unknown fields are rejected, so a producer running an older
/// or newer schema surfaces as a parse failure instead of a half-filled row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageLogEntry {
    pub user_id: String,
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Cost in USD.
    pub cost: f64,
    #[serde(deserialize_with = "storable_latency")]
    pub latency_ms: u64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl UsageLogEntry {
    /// Decode a queued payload.
    pub fn from_slice(raw: &[u8]) -> Result<Self, EntryParseError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Encode for the queue.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// `usage_log.latency_ms` is a signed 64-bit column; anything larger is a
/// malformed entry rather than a value to clamp.
fn storable_latency<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u64::deserialize(deserializer)?;
    if i64::try_from(value).is_err() {
        return Err(serde::de::Error::custom(format!(
            "latency_ms {value} exceeds the storable range"
        )));
    }
    Ok(value)
}

/// Serialize an entry and push it onto the queue. Used by in-process
/// producers and by the `requeue` dead-letter policy.
pub fn enqueue(queue: &dyn UsageQueue, entry: &UsageLogEntry) -> Result<(), QueueError> {
    let payload = entry.to_payload()?;
    queue.push(&payload)
}


#[cfg(test)]
mod tests {
    use super::fixtures::entry;
    use super::*;
    use crate::queue::{MemoryQueue, Popped};

    #[test]
    fn test_parse_well_formed_payload() {
        let raw = br#"{
            "user_id": "u1",
            "request_id": "r1",
            "provider": "gemini",
            "model": "gemini-pro",
            "input_tokens": 12,
            "output_tokens": 34,
            "cost": 0.01,
            "latency_ms": 150,
            "status": "success",
            "timestamp": "2025-03-01T12:00:00Z"
        }"#;

        let parsed = UsageLogEntry::from_slice(raw).unwrap();
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.input_tokens, 12);
        assert_eq!(parsed.output_tokens, 34);
        assert_eq!(parsed.timestamp.to_rfc3339(), "2025-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let raw = br#"{"user_id": "u1", "request_id": "r1"}"#;
        assert!(UsageLogEntry::from_slice(raw).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let mut value = serde_json::to_value(entry("r1")).unwrap();
        value["extra"] = serde_json::json!(true);
        let raw = serde_json::to_vec(&value).unwrap();
        assert!(UsageLogEntry::from_slice(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(UsageLogEntry::from_slice(b"not json at all").is_err());
        assert!(UsageLogEntry::from_slice(b"").is_err());
    }

    #[test]
    fn test_parse_rejects_negative_tokens() {
        let mut value = serde_json::to_value(entry("r1")).unwrap();
        value["input_tokens"] = serde_json::json!(-5);
        let raw = serde_json::to_vec(&value).unwrap();
        assert!(UsageLogEntry::from_slice(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_latency_beyond_i64() {
        let mut value = serde_json::to_value(entry("r1")).unwrap();
        value["latency_ms"] = serde_json::json!(u64::MAX);
        let raw = serde_json::to_vec(&value).unwrap();
        let err = UsageLogEntry::from_slice(&raw).unwrap_err();
        assert!(err.to_string().contains("exceeds the storable range"));

        value["latency_ms"] = serde_json::json!(i64::MAX);
        let raw = serde_json::to_vec(&value).unwrap();
        assert_eq!(
            UsageLogEntry::from_slice(&raw).unwrap().latency_ms,
            i64::MAX as u64
        );
    }

    #[test]
    fn test_enqueue_pushes_decodable_payload() {
        let queue = MemoryQueue::new("usage:test");
        enqueue(&queue, &entry("r1")).unwrap();

        match queue.pop_oldest().unwrap() {
            Popped::Item(raw) => {
                assert_eq!(UsageLogEntry::from_slice(&raw).unwrap(), entry("r1"));
            }
            Popped::Empty => panic!("expected an item"),
        }
    }
}
