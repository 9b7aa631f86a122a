//! Outbound request envelopes and the flow steps they belong to.

use hiprelay_storage::FlowFields;
use serde::Serialize;
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use uuid::Uuid;

use super::error::FlowError;

/// `2024-05-01T10:00:00.000Z`
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

/// One gateway operation in a KYC/linking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStep {
    FetchModes,
    LinkToken,
    AuthInit,
    AuthConfirm,
    LinkCareContext,
}

impl FlowStep {
    /// Prefix of the fields this step writes into a flow record.
    pub fn field_prefix(self) -> &'static str {
        match self {
            Self::FetchModes => "fetch",
            Self::LinkToken => "link_token",
            Self::AuthInit => "auth_init",
            Self::AuthConfirm => "auth_confirm",
            Self::LinkCareContext => "link_care_context",
        }
    }

    /// Route name, also used in log fields.
    pub fn name(self) -> &'static str {
        match self {
            Self::FetchModes => "fetch-modes",
            Self::LinkToken => "generate-link-token",
            Self::AuthInit => "auth-init",
            Self::AuthConfirm => "confirm-auth",
            Self::LinkCareContext => "link-care-context",
        }
    }

    pub fn req_body_field(self) -> String {
        format!("{}_req_body", self.field_prefix())
    }

    pub fn request_id_field(self) -> String {
        format!("{}_requestId", self.field_prefix())
    }

    /// Message returned to the caller when the gateway rejects this step.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::FetchModes => "An error occurred while fetching modes",
            Self::LinkToken => "An error occurred while generating the link token",
            Self::AuthInit => "An error occurred while initiating authentication",
            Self::AuthConfirm => "An error occurred while confirming authentication",
            Self::LinkCareContext => "An error occurred while linking care context",
        }
    }
}

impl std::fmt::Display for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The JSON document posted to the gateway.
///
/// Every envelope carries a fresh request id and the current UTC time; the
/// operation body (`query`, `link`, `transactionId`, ...) is flattened
/// alongside them.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Envelope {
    pub fn new(body: Map<String, Value>) -> Result<Self, FlowError> {
        let timestamp = OffsetDateTime::now_utc()
            .format(TIMESTAMP_FORMAT)
            .map_err(|e| FlowError::Request(format!("failed to format timestamp: {e}")))?;
        Ok(Self {
            request_id: Uuid::new_v4().to_string(),
            timestamp,
            body,
        })
    }

    pub fn to_value(&self) -> Result<Value, FlowError> {
        serde_json::to_value(self)
            .map_err(|e| FlowError::Request(format!("failed to serialize envelope: {e}")))
    }

    /// The `<step>_req_body` and `<step>_requestId` fields recorded for this envelope.
    pub fn persisted_fields(&self, step: FlowStep) -> Result<FlowFields, FlowError> {
        let mut fields = FlowFields::new();
        fields.insert(step.req_body_field(), self.to_value()?);
        fields.insert(
            step.request_id_field(),
            Value::String(self.request_id.clone()),
        );
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::format_description::well_known::Rfc3339;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_field_names() {
        assert_eq!(FlowStep::FetchModes.req_body_field(), "fetch_req_body");
        assert_eq!(FlowStep::LinkToken.request_id_field(), "link_token_requestId");
        assert_eq!(
            FlowStep::LinkCareContext.req_body_field(),
            "link_care_context_req_body"
        );
        assert_eq!(FlowStep::AuthConfirm.to_string(), "confirm-auth");
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::new(body(json!({"query": {"id": "user@sbx"}}))).unwrap();
        let value = envelope.to_value().unwrap();

        assert_eq!(value["requestId"], envelope.request_id.as_str());
        assert_eq!(value["query"]["id"], "user@sbx");
        assert!(Uuid::parse_str(&envelope.request_id).is_ok());

        let ts = value["timestamp"].as_str().unwrap();
        assert_eq!(ts.len(), "2024-05-01T10:00:00.000Z".len());
        assert!(ts.ends_with('Z'));
        assert!(OffsetDateTime::parse(ts, &Rfc3339).is_ok());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = Envelope::new(Map::new()).unwrap();
        let b = Envelope::new(Map::new()).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_persisted_fields_mirror_envelope() {
        let envelope = Envelope::new(body(json!({"query": {"id": "x"}}))).unwrap();
        let fields = envelope.persisted_fields(FlowStep::AuthInit).unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields["auth_init_requestId"], envelope.request_id.as_str());
        assert_eq!(fields["auth_init_req_body"], envelope.to_value().unwrap());
    }
}
