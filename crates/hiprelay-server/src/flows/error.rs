//! Errors raised while running a flow step and their HTTP translation.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hiprelay_auth::{EncryptionError, TokenError};
use hiprelay_storage::StorageError;
use serde_json::{Value, json};

use super::envelope::FlowStep;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The inbound body is missing an identifying field or is malformed.
    #[error("{0}")]
    Validation(String),

    /// The body was refused before it could be read as JSON, e.g. a missing
    /// content type (415) or a body over the size limit (413).
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Failed to acquire gateway access token: {0}")]
    Token(#[from] TokenError),

    #[error("Failed to encrypt credential: {0}")]
    Encryption(#[from] EncryptionError),

    /// The gateway answered with a non-success status.
    #[error("Gateway returned status {status} for {step}")]
    GatewayStatus {
        step: FlowStep,
        status: u16,
        details: Value,
    },

    /// No response from the gateway (connect failure, timeout, reset).
    #[error("Gateway unreachable: {0}")]
    GatewayUnreachable(String),

    /// The outbound request could not be constructed.
    #[error("Failed to build gateway request: {0}")]
    Request(String),

    #[error("Failed to persist flow record: {0}")]
    Storage(#[from] StorageError),
}

impl FlowError {
    pub fn missing_field(name: &str) -> Self {
        Self::Validation(format!("Missing required field: {name}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Rejected { status, .. } => *status,
            Self::Token(TokenError::Request(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Token(_) => StatusCode::BAD_GATEWAY,
            Self::Encryption(e) if e.is_upstream() => StatusCode::BAD_GATEWAY,
            Self::Encryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::GatewayStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::GatewayUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Request(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Self::GatewayStatus { step, details, .. } => json!({
                "error": step.failure_message(),
                "details": details,
            }),
            // Store internals stay in the logs.
            Self::Storage(_) => json!({ "error": "Failed to persist flow record" }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
