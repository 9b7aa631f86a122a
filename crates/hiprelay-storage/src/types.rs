//! Flow record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Name of the natural-key field inside every flow record document.
pub const HEALTH_ID_FIELD: &str = "healthID";

/// Name of the field the authentication steps write the gateway transaction id to.
pub const TRANSACTION_ID_FIELD: &str = "transactionId";

/// Top-level fields written by one flow step.
pub type FlowFields = Map<String, Value>;

/// A flow record as stored by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    /// The health identifier this record belongs to.
    pub health_id: String,
    /// The accumulated document, including the `healthID` field.
    pub document: FlowFields,
    /// Number of writes applied to this record, starting at 1.
    pub revision: i64,
    /// When the record was first written.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the record was last written.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FlowRecord {
    /// Creates a fresh record for `health_id` holding `fields`.
    #[must_use]
    pub fn new(health_id: impl Into<String>, fields: FlowFields) -> Self {
        let health_id = health_id.into();
        let mut document = FlowFields::new();
        document.insert(HEALTH_ID_FIELD.to_string(), Value::String(health_id.clone()));
        merge_fields(&mut document, fields);

        let now = OffsetDateTime::now_utc();
        Self {
            health_id,
            document,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges `fields` into this record and bumps its revision.
    pub fn apply(&mut self, fields: FlowFields) {
        merge_fields(&mut self.document, fields);
        self.revision += 1;
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Returns a top-level field of the document.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.document.get(name)
    }

    /// Returns the gateway transaction id recorded by an authentication step.
    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.field(TRANSACTION_ID_FIELD).and_then(Value::as_str)
    }
}

/// Shallow merge of `fields` into `target`.
///
/// Keys present in `fields` replace the same keys in `target`; other keys in
/// `target` are kept. The `healthID` key is never overwritten.
pub fn merge_fields(target: &mut FlowFields, fields: FlowFields) {
    for (key, value) in fields {
        if key == HEALTH_ID_FIELD && target.contains_key(HEALTH_ID_FIELD) {
            continue;
        }
        target.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FlowFields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_new_record_carries_health_id() {
        let record = FlowRecord::new("user@sbx", fields(json!({"fetch_requestId": "r1"})));
        assert_eq!(record.health_id, "user@sbx");
        assert_eq!(record.field(HEALTH_ID_FIELD), Some(&json!("user@sbx")));
        assert_eq!(record.field("fetch_requestId"), Some(&json!("r1")));
        assert_eq!(record.revision, 1);
    }

    #[test]
    fn test_apply_keeps_unrelated_fields() {
        let mut record = FlowRecord::new("user@sbx", fields(json!({"fetch_requestId": "r1"})));
        record.apply(fields(json!({"link_token_requestId": "r2"})));

        assert_eq!(record.field("fetch_requestId"), Some(&json!("r1")));
        assert_eq!(record.field("link_token_requestId"), Some(&json!("r2")));
        assert_eq!(record.revision, 2);
    }

    #[test]
    fn test_apply_overwrites_same_step() {
        let mut record = FlowRecord::new("user@sbx", fields(json!({"fetch_requestId": "r1"})));
        record.apply(fields(json!({"fetch_requestId": "r3"})));
        assert_eq!(record.field("fetch_requestId"), Some(&json!("r3")));
    }

    #[test]
    fn test_merge_never_rewrites_health_id() {
        let mut record = FlowRecord::new("user@sbx", FlowFields::new());
        record.apply(fields(json!({"healthID": "other@sbx"})));
        assert_eq!(record.field(HEALTH_ID_FIELD), Some(&json!("user@sbx")));
    }

    #[test]
    fn test_transaction_id() {
        let mut record = FlowRecord::new("user@sbx", FlowFields::new());
        assert_eq!(record.transaction_id(), None);
        record.apply(fields(json!({"transactionId": "txn-1"})));
        assert_eq!(record.transaction_id(), Some("txn-1"));
    }
}
