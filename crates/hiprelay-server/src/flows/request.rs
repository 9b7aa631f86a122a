//! Inbound request bodies and their validation.
//!
//! Bodies are accepted as loose JSON and checked field by field so that every
//! structural problem is reported as a 400 with the name of the missing field.
//! Transport-level rejections (wrong content type, body over the size limit)
//! keep the status axum assigns them.

use axum::{Json, extract::rejection::JsonRejection};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};

use super::error::FlowError;

pub const PURPOSE_KYC_AND_LINK: &str = "KYC_AND_LINK";
pub const DEFAULT_AUTH_MODE: &str = "DEMOGRAPHICS";

/// Decodes a JSON body into one of the request types below.
pub fn parse<T: DeserializeOwned>(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<T, FlowError> {
    let Json(value) = payload.map_err(|rejection| match rejection {
        JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
            FlowError::Validation(rejection.body_text())
        }
        other => FlowError::Rejected {
            status: other.status(),
            message: other.body_text(),
        },
    })?;
    if !value.is_object() {
        return Err(FlowError::Validation(
            "Request body must be a JSON object".into(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| FlowError::Validation(format!("Invalid request body: {e}")))
}

fn required_str(value: Option<String>, name: &str) -> Result<String, FlowError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(FlowError::missing_field(name)),
    }
}

fn required_object(value: Option<Value>, name: &str) -> Result<Value, FlowError> {
    match value {
        Some(v @ Value::Object(_)) => Ok(v),
        _ => Err(FlowError::missing_field(name)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A health id together with the requesting facility.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTarget {
    pub health_id: String,
    pub requester: Value,
}

impl QueryTarget {
    /// `{id, purpose, requester}`, the `query` object shared by discovery and auth steps.
    pub fn query(&self) -> Map<String, Value> {
        let mut query = Map::new();
        query.insert("id".into(), Value::String(self.health_id.clone()));
        query.insert("purpose".into(), json!(PURPOSE_KYC_AND_LINK));
        query.insert("requester".into(), self.requester.clone());
        query
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FetchModesRequest {
    pub id: Option<String>,
    pub requester: Option<Value>,
}

impl FetchModesRequest {
    pub fn validate(self) -> Result<QueryTarget, FlowError> {
        Ok(QueryTarget {
            health_id: required_str(self.id, "id")?,
            requester: required_object(self.requester, "requester")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkTokenRequest {
    pub id: Option<String>,
    pub abha_address: Option<String>,
    pub requester: Option<Value>,
}

impl LinkTokenRequest {
    pub fn validate(self) -> Result<QueryTarget, FlowError> {
        let health_id = non_empty(self.id)
            .or_else(|| non_empty(self.abha_address))
            .ok_or_else(|| FlowError::missing_field("id or abhaAddress"))?;
        Ok(QueryTarget {
            health_id,
            requester: required_object(self.requester, "requester")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthQuery {
    pub id: Option<String>,
    pub requester: Option<Value>,
    pub auth_mode: Option<String>,
}

/// Body shared by `/auth-init` and `/confirm-auth`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthRequest {
    pub query: Option<AuthQuery>,
    pub transaction_id: Option<String>,
    pub credential: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthTarget {
    pub target: QueryTarget,
    pub auth_mode: String,
    pub transaction_id: Option<String>,
    pub credential: Option<Map<String, Value>>,
}

impl AuthRequest {
    pub fn validate(self) -> Result<AuthTarget, FlowError> {
        let query = self.query.ok_or_else(|| FlowError::missing_field("query"))?;
        let target = QueryTarget {
            health_id: required_str(query.id, "query.id")?,
            requester: required_object(query.requester, "query.requester")?,
        };
        let credential = match self.credential {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(FlowError::Validation(
                    "credential must be a JSON object".into(),
                ));
            }
        };
        Ok(AuthTarget {
            target,
            auth_mode: non_empty(query.auth_mode).unwrap_or_else(|| DEFAULT_AUTH_MODE.into()),
            transaction_id: non_empty(self.transaction_id),
            credential,
        })
    }
}

impl AuthTarget {
    /// The `query` object with `authMode` added.
    pub fn query(&self) -> Map<String, Value> {
        let mut query = self.target.query();
        query.insert("authMode".into(), Value::String(self.auth_mode.clone()));
        query
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkCareContextRequest {
    pub transaction_id: Option<String>,
    pub care_context_id: Option<String>,
    pub display: Option<String>,
    pub id: Option<String>,
    pub abha_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CareContextLink {
    pub transaction_id: String,
    pub care_context_id: String,
    pub display: String,
    /// Record to annotate when the caller names it; otherwise the record is
    /// located by `transaction_id`.
    pub health_id: Option<String>,
}

impl LinkCareContextRequest {
    pub fn validate(self) -> Result<CareContextLink, FlowError> {
        Ok(CareContextLink {
            transaction_id: required_str(self.transaction_id, "transactionId")?,
            care_context_id: required_str(self.care_context_id, "careContextId")?,
            display: required_str(self.display, "display")?,
            health_id: non_empty(self.id).or_else(|| non_empty(self.abha_address)),
        })
    }
}

impl CareContextLink {
    /// `{transactionId, link: {careContext: [{careContextId, display}]}}`
    pub fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert(
            "transactionId".into(),
            Value::String(self.transaction_id.clone()),
        );
        body.insert(
            "link".into(),
            json!({
                "careContext": [{
                    "careContextId": self.care_context_id,
                    "display": self.display,
                }]
            }),
        );
        body
    }
}
