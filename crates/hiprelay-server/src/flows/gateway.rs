//! Outbound calls to the health-exchange gateway.

use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use hiprelay_auth::{AccessToken, CertificateEncryptor, GatewaySessionClient};
use serde_json::Value;
use tracing::{info, warn};

use super::{
    envelope::{Envelope, FlowStep},
    error::FlowError,
};
use crate::config::GatewayConfig;

pub const HEADER_CM_ID: &str = "X-CM-ID";
pub const HEADER_REQUEST_ID: &str = "REQUEST-ID";
pub const HEADER_TIMESTAMP: &str = "TIMESTAMP";

/// A successful gateway answer, relayed to the caller as-is.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl GatewayResponse {
    /// Parses the body as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Token acquisition, payload encryption and operation calls against one gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http_client: reqwest::Client,
    session: GatewaySessionClient,
    encryptor: CertificateEncryptor,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Builds a client whose timeouts are taken from `config`.
    pub fn new(config: GatewayConfig) -> Result<Self, FlowError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| FlowError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http_client, config))
    }

    pub fn with_http_client(http_client: reqwest::Client, config: GatewayConfig) -> Self {
        let session = GatewaySessionClient::new(
            http_client.clone(),
            config.session_url.clone(),
            config.credentials(),
        );
        let encryptor = CertificateEncryptor::new(
            http_client.clone(),
            config.certificate_url.clone(),
            config.certificate_markers.clone(),
        );
        Self {
            http_client,
            session,
            encryptor,
            config,
        }
    }

    pub async fn access_token(&self) -> Result<AccessToken, FlowError> {
        self.session.acquire_access_token().await.map_err(|e| {
            warn!(error = %e, "Gateway token acquisition failed");
            FlowError::from(e)
        })
    }

    pub async fn encrypt(&self, token: &AccessToken, plaintext: &str) -> Result<String, FlowError> {
        self.encryptor.encrypt(token, plaintext).await.map_err(|e| {
            warn!(error = %e, "Credential encryption failed");
            FlowError::from(e)
        })
    }

    /// Posts `envelope` to the endpoint configured for `step`.
    ///
    /// Non-success statuses come back as [`FlowError::GatewayStatus`] carrying
    /// the gateway body, so callers only ever see successful responses here.
    pub async fn post(
        &self,
        step: FlowStep,
        token: &AccessToken,
        envelope: &Envelope,
    ) -> Result<GatewayResponse, FlowError> {
        let url = self.config.url_for(step);
        let request = self
            .http_client
            .post(url)
            .header(header::AUTHORIZATION, token.authorization_header_value())
            .header(HEADER_CM_ID, &self.config.cm_id)
            .header(HEADER_REQUEST_ID, &envelope.request_id)
            .header(HEADER_TIMESTAMP, &envelope.timestamp)
            .json(envelope)
            .build()
            .map_err(|e| FlowError::Request(e.to_string()))?;

        let started = Instant::now();
        let response = self.http_client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                warn!(%step, url, "Gateway request timed out");
            } else {
                warn!(%step, url, error = %e, "Gateway unreachable");
            }
            FlowError::GatewayUnreachable(e.to_string())
        })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            warn!(%step, error = %e, "Failed to read gateway response body");
            FlowError::GatewayUnreachable(e.to_string())
        })?;
        info!(
            %step,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Gateway call completed"
        );

        if !status.is_success() {
            warn!(%step, status = status.as_u16(), "Gateway rejected request");
            let details = serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
            return Err(FlowError::GatewayStatus {
                step,
                status: status.as_u16(),
                details,
            });
        }

        Ok(GatewayResponse {
            status,
            content_type,
            body,
        })
    }
}
