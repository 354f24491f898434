//! # Wire Payloads
//!
//! Both transports carry the same flat, string-keyed business payload:
//! `{taskId, userId, documentId, filePath}`. A delivery missing any of the
//! four keys (or carrying an unparseable value) is a poison message:
//! acknowledged and dropped without ever touching the task store, so it
//! can never block the consumer's acknowledgment position.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::MessagingError;

/// Business content of a task delivery on either transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTaskMessage {
    pub task_id: Uuid,
    pub user_id: i64,
    pub document_id: i64,
    pub file_path: String,
}

impl IngestTaskMessage {
    pub fn new(task_id: Uuid, user_id: i64, document_id: i64, file_path: impl Into<String>) -> Self {
        Self {
            task_id,
            user_id,
            document_id,
            file_path: file_path.into(),
        }
    }

    /// Serialize to the wire form: a flat map with string values, so the
    /// payload is identical whichever transport carries it.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "taskId": self.task_id.to_string(),
            "userId": self.user_id.to_string(),
            "documentId": self.document_id.to_string(),
            "filePath": self.file_path,
        })
    }

    /// Parse a delivery payload. Any missing key, blank value, or
    /// unparseable id makes the delivery poison; the error carries the
    /// reason for the forensic log line.
    pub fn parse(value: &Value) -> Result<Self, MessagingError> {
        let map = value
            .as_object()
            .ok_or_else(|| MessagingError::deserialization("payload is not a JSON object"))?;

        let task_id_raw = string_field(map, "taskId")?;
        let task_id = task_id_raw.parse::<Uuid>().map_err(|e| {
            MessagingError::deserialization(format!("taskId is not a valid UUID: {e}"))
        })?;

        let user_id = numeric_field(map, "userId")?;
        let document_id = numeric_field(map, "documentId")?;
        let file_path = string_field(map, "filePath")?;

        Ok(Self {
            task_id,
            user_id,
            document_id,
            file_path,
        })
    }

    /// The raw taskId value of a payload, if present. Used for dead-letter
    /// forensics on poison deliveries that failed full parsing.
    pub fn raw_task_id(value: &Value) -> Option<String> {
        value
            .get("taskId")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

fn string_field(
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<String, MessagingError> {
    let raw = map
        .get(key)
        .ok_or_else(|| MessagingError::deserialization(format!("missing field: {key}")))?;
    let s = raw
        .as_str()
        .ok_or_else(|| MessagingError::deserialization(format!("field is not a string: {key}")))?;
    if s.trim().is_empty() {
        return Err(MessagingError::deserialization(format!(
            "field is blank: {key}"
        )));
    }
    Ok(s.to_string())
}

/// Numeric ids arrive as JSON numbers (typed producers) or numeric strings
/// (string-map producers); accept both.
fn numeric_field(map: &serde_json::Map<String, Value>, key: &str) -> Result<i64, MessagingError> {
    let raw = map
        .get(key)
        .ok_or_else(|| MessagingError::deserialization(format!("missing field: {key}")))?;
    match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| MessagingError::deserialization(format!("field is not an integer: {key}"))),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            MessagingError::deserialization(format!("field is not an integer: {key}"))
        }),
        _ => Err(MessagingError::deserialization(format!(
            "field is not an integer: {key}"
        ))),
    }
}

/// Forensic record written to the dead-letter queue: a pointer back to the
/// original delivery, not a payload copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    pub task_id: String,
    pub source_queue: String,
    pub source_group: String,
    pub source_delivery_id: String,
}

/// Broker envelope used by the outbox transport: routing key plus the
/// serialized business payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerEnvelope {
    pub message_key: String,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> Value {
        serde_json::json!({
            "taskId": "6f7c3f9e-8b1a-4b6e-9d0a-1c2d3e4f5a6b",
            "userId": "42",
            "documentId": "7",
            "filePath": "/data/uploads/doc.pdf",
        })
    }

    #[test]
    fn test_round_trip_through_wire_form() {
        let message = IngestTaskMessage::new(Uuid::new_v4(), 42, 7, "/data/uploads/doc.pdf");
        let parsed = IngestTaskMessage::parse(&message.to_wire()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_accepts_numeric_ids_as_json_numbers() {
        let mut payload = valid_payload();
        payload["userId"] = serde_json::json!(42);
        payload["documentId"] = serde_json::json!(7);
        let parsed = IngestTaskMessage::parse(&payload).unwrap();
        assert_eq!(parsed.user_id, 42);
        assert_eq!(parsed.document_id, 7);
    }

    #[test]
    fn test_missing_any_key_is_poison() {
        for key in ["taskId", "userId", "documentId", "filePath"] {
            let mut payload = valid_payload();
            payload.as_object_mut().unwrap().remove(key);
            assert!(
                IngestTaskMessage::parse(&payload).is_err(),
                "missing {key} should be poison"
            );
        }
    }

    #[test]
    fn test_blank_file_path_is_poison() {
        let mut payload = valid_payload();
        payload["filePath"] = serde_json::json!("   ");
        assert!(IngestTaskMessage::parse(&payload).is_err());
    }

    #[test]
    fn test_malformed_task_id_is_poison() {
        let mut payload = valid_payload();
        payload["taskId"] = serde_json::json!("not-a-uuid");
        assert!(IngestTaskMessage::parse(&payload).is_err());
    }

    #[test]
    fn test_non_numeric_user_id_is_poison() {
        let mut payload = valid_payload();
        payload["userId"] = serde_json::json!("forty-two");
        assert!(IngestTaskMessage::parse(&payload).is_err());
    }

    #[test]
    fn test_non_object_payload_is_poison() {
        assert!(IngestTaskMessage::parse(&serde_json::json!("oops")).is_err());
        assert!(IngestTaskMessage::parse(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn test_raw_task_id_survives_partial_poison() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("filePath");
        assert_eq!(
            IngestTaskMessage::raw_task_id(&payload).as_deref(),
            Some("6f7c3f9e-8b1a-4b6e-9d0a-1c2d3e4f5a6b")
        );
    }

    #[test]
    fn test_dead_letter_wire_names() {
        let record = DeadLetterMessage {
            task_id: "t".to_string(),
            source_queue: "q".to_string(),
            source_group: "g".to_string(),
            source_delivery_id: "17".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("taskId").is_some());
        assert!(json.get("sourceQueue").is_some());
        assert!(json.get("sourceGroup").is_some());
        assert!(json.get("sourceDeliveryId").is_some());
    }
}
