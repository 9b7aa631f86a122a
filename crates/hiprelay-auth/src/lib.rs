//! Gateway credentials for the HIP relay.
//!
//! Two helpers sit in front of every gateway call:
//!
//! - [`session::GatewaySessionClient`] exchanges the configured client id and
//!   secret for a bearer token at the gateway session endpoint.
//! - [`encryption::CertificateEncryptor`] fetches the gateway public
//!   certificate and RSA-encrypts sensitive payload fields.
//!
//! Both return typed errors ([`TokenError`], [`EncryptionError`]) so callers
//! never forward a failure message in place of a credential.
//!
//! # Example
//!
//! ```ignore
//! use hiprelay_auth::{GatewayCredentials, GatewaySessionClient};
//!
//! let client = GatewaySessionClient::new(http, session_url, credentials);
//! let token = client.acquire_access_token().await?;
//! request.header("Authorization", token.authorization_header_value());
//! ```

pub mod encryption;
pub mod error;
pub mod session;

pub use encryption::{CertificateEncryptor, CertificateMarkers, extract_public_key};
pub use error::{EncryptionError, TokenError};
pub use session::{AccessToken, GatewayCredentials, GatewaySessionClient};
