//! Gateway session tokens.
//!
//! Every flow handler acquires a fresh token; nothing is cached.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::TokenError;

/// Client credentials issued by the gateway operator.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct GatewayCredentials {
    /// Client identifier registered with the gateway.
    #[serde(default)]
    pub client_id: String,
    /// Client secret registered with the gateway.
    #[serde(default)]
    pub client_secret: String,
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_token: String,
}

/// A bearer token issued by the gateway session endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, without the scheme.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The value for an `Authorization` header: `Bearer <token>`.
    #[must_use]
    pub fn authorization_header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(****)")
    }
}

/// Exchanges client credentials for access tokens at the gateway session endpoint.
#[derive(Debug, Clone)]
pub struct GatewaySessionClient {
    http_client: reqwest::Client,
    session_url: String,
    credentials: GatewayCredentials,
}

impl GatewaySessionClient {
    /// Creates a session client. Timeouts come from `http_client`.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        session_url: impl Into<String>,
        credentials: GatewayCredentials,
    ) -> Self {
        Self {
            http_client,
            session_url: session_url.into(),
            credentials,
        }
    }

    /// Requests a new access token.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Unreachable`] if no response arrives
    /// - [`TokenError::Rejected`] on a non-success status
    /// - [`TokenError::MalformedResponse`] if the body has no `accessToken`
    #[instrument(skip(self), fields(url = %self.session_url))]
    pub async fn acquire_access_token(&self) -> Result<AccessToken, TokenError> {
        let body = SessionRequest {
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            grant_type: "client_credentials",
        };

        let response = self
            .http_client
            .post(&self.session_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    TokenError::Request(e.to_string())
                } else {
                    warn!(error = %e, "Session endpoint unreachable");
                    TokenError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Session endpoint rejected credentials");
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| TokenError::MalformedResponse(e.to_string()))?;

        if session.access_token.is_empty() {
            return Err(TokenError::MalformedResponse(
                "accessToken is empty".to_string(),
            ));
        }

        debug!("Gateway access token acquired");
        Ok(AccessToken::new(session.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> GatewayCredentials {
        GatewayCredentials {
            client_id: "SBX_001".into(),
            client_secret: "s3cret".into(),
        }
    }

    #[test]
    fn test_authorization_header_value() {
        let token = AccessToken::new("abc.def");
        assert_eq!(token.authorization_header_value(), "Bearer abc.def");
        assert_eq!(token.as_str(), "abc.def");
        assert_eq!(format!("{token:?}"), "AccessToken(****)");
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("SBX_001"));
        assert!(!rendered.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_acquire_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .and(body_json(json!({
                "clientId": "SBX_001",
                "clientSecret": "s3cret",
                "grantType": "client_credentials"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "tok-1", "expiresIn": 1200})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GatewaySessionClient::new(
            reqwest::Client::new(),
            format!("{}/sessions", server.uri()),
            credentials(),
        );
        let token = client.acquire_access_token().await.unwrap();
        assert_eq!(token.authorization_header_value(), "Bearer tok-1");
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid client"))
            .mount(&server)
            .await;

        let client = GatewaySessionClient::new(
            reqwest::Client::new(),
            format!("{}/sessions", server.uri()),
            credentials(),
        );
        let err = client.acquire_access_token().await.unwrap_err();
        match err {
            TokenError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid client");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_access_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokenType": "bearer"})))
            .mount(&server)
            .await;

        let client =
            GatewaySessionClient::new(reqwest::Client::new(), server.uri(), credentials());
        let err = client.acquire_access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_session_endpoint() {
        let server = MockServer::start().await;
        let url = format!("{}/sessions", server.uri());
        drop(server);

        let client = GatewaySessionClient::new(reqwest::Client::new(), url, credentials());
        let err = client.acquire_access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::Unreachable(_)));
    }
}
