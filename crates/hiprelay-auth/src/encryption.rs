//! RSA encryption of payload fields with the gateway's public certificate.
//!
//! The certificate endpoint returns a PEM-armoured public key, sometimes
//! wrapped in a JSON object under `publicKey`. The key body is located by
//! matching the armour markers rather than by position, so extra whitespace
//! or a trailing newline in the response does not corrupt the key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::EncryptionError;
use crate::session::AccessToken;

/// Armour lines surrounding the key body in the certificate response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMarkers {
    #[serde(default = "default_begin_marker")]
    pub begin: String,
    #[serde(default = "default_end_marker")]
    pub end: String,
}

fn default_begin_marker() -> String {
    "-----BEGIN PUBLIC KEY-----".into()
}
fn default_end_marker() -> String {
    "-----END PUBLIC KEY-----".into()
}

impl Default for CertificateMarkers {
    fn default() -> Self {
        Self {
            begin: default_begin_marker(),
            end: default_end_marker(),
        }
    }
}

/// Pulls the certificate text out of a JSON envelope, if there is one.
fn unwrap_json_envelope(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("publicKey")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Returns the base64 key body between the armour markers.
///
/// The configured markers are tried first. When they are absent, any line
/// starting with `-----` is treated as armour and dropped, which also covers
/// `BEGIN RSA PUBLIC KEY` blocks and bare base64 bodies.
fn key_body(text: &str, markers: &CertificateMarkers) -> String {
    let inner = match (text.find(&markers.begin), text.rfind(&markers.end)) {
        (Some(start), Some(end)) if start + markers.begin.len() <= end => {
            &text[start + markers.begin.len()..end]
        }
        _ => text,
    };

    inner
        .lines()
        .filter(|line| !line.trim_start().starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Parses an RSA public key from a certificate response body.
///
/// Accepts SubjectPublicKeyInfo and PKCS#1 `RSAPublicKey` encodings.
///
/// # Errors
///
/// Returns [`EncryptionError::InvalidCertificate`] if no key can be decoded.
pub fn extract_public_key(
    body: &str,
    markers: &CertificateMarkers,
) -> Result<RsaPublicKey, EncryptionError> {
    let text = unwrap_json_envelope(body).unwrap_or_else(|| body.to_string());
    let encoded = key_body(&text, markers);
    if encoded.is_empty() {
        return Err(EncryptionError::InvalidCertificate(
            "certificate body is empty".to_string(),
        ));
    }

    let der = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| EncryptionError::InvalidCertificate(format!("invalid base64: {e}")))?;

    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| EncryptionError::InvalidCertificate(format!("not an RSA public key: {e}")))
}

/// Encrypts `plaintext` with PKCS#1 v1.5 padding and returns standard base64.
pub fn encrypt_with_key(key: &RsaPublicKey, plaintext: &str) -> Result<String, EncryptionError> {
    let mut rng = rand::thread_rng();
    let ciphertext = key
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
        .map_err(|e| EncryptionError::Encrypt(e.to_string()))?;
    Ok(STANDARD.encode(ciphertext))
}

/// Fetches the gateway certificate and encrypts values with it.
#[derive(Debug, Clone)]
pub struct CertificateEncryptor {
    http_client: reqwest::Client,
    certificate_url: String,
    markers: CertificateMarkers,
}

impl CertificateEncryptor {
    /// Creates an encryptor for the given certificate endpoint.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        certificate_url: impl Into<String>,
        markers: CertificateMarkers,
    ) -> Self {
        Self {
            http_client,
            certificate_url: certificate_url.into(),
            markers,
        }
    }

    /// Fetches the current gateway public key.
    #[instrument(skip(self, token), fields(url = %self.certificate_url))]
    pub async fn fetch_public_key(
        &self,
        token: &AccessToken,
    ) -> Result<RsaPublicKey, EncryptionError> {
        let response = self
            .http_client
            .get(&self.certificate_url)
            .header(reqwest::header::AUTHORIZATION, token.authorization_header_value())
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Certificate endpoint unreachable");
                EncryptionError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Certificate endpoint returned an error");
            return Err(EncryptionError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| EncryptionError::Unreachable(e.to_string()))?;

        let key = extract_public_key(&body, &self.markers)?;
        debug!("Gateway public key loaded");
        Ok(key)
    }

    /// Fetches the certificate and encrypts `plaintext` with it.
    pub async fn encrypt(
        &self,
        token: &AccessToken,
        plaintext: &str,
    ) -> Result<String, EncryptionError> {
        let key = self.fetch_public_key(token).await?;
        encrypt_with_key(&key, plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key_pair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).expect("key generation");
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    fn decrypt(private: &RsaPrivateKey, encoded: &str) -> String {
        let ciphertext = STANDARD.decode(encoded).unwrap();
        let plain = private.decrypt(Pkcs1v15Encrypt, &ciphertext).unwrap();
        String::from_utf8(plain).unwrap()
    }

    #[test]
    fn test_extract_spki_pem() {
        let (_, public) = key_pair();
        let pem = public.to_public_key_pem(LineEnding::LF).unwrap();

        let key = extract_public_key(&pem, &CertificateMarkers::default()).unwrap();
        assert_eq!(key, public);
    }

    #[test]
    fn test_extract_tolerates_surrounding_whitespace() {
        let (_, public) = key_pair();
        let pem = public.to_public_key_pem(LineEnding::CRLF).unwrap();
        let padded = format!("\n\n  {pem}\n\n");

        let key = extract_public_key(&padded, &CertificateMarkers::default()).unwrap();
        assert_eq!(key, public);
    }

    #[test]
    fn test_extract_pkcs1_pem() {
        let (_, public) = key_pair();
        let pem = public.to_pkcs1_pem(LineEnding::LF).unwrap();

        let key = extract_public_key(&pem, &CertificateMarkers::default()).unwrap();
        assert_eq!(key, public);
    }

    #[test]
    fn test_extract_from_json_envelope() {
        let (_, public) = key_pair();
        let pem = public.to_public_key_pem(LineEnding::LF).unwrap();
        let body = serde_json::json!({ "publicKey": pem }).to_string();

        let key = extract_public_key(&body, &CertificateMarkers::default()).unwrap();
        assert_eq!(key, public);
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let err = extract_public_key("not a certificate", &CertificateMarkers::default())
            .unwrap_err();
        assert!(matches!(err, EncryptionError::InvalidCertificate(_)));

        let err = extract_public_key("", &CertificateMarkers::default()).unwrap_err();
        assert!(matches!(err, EncryptionError::InvalidCertificate(_)));
    }

    #[test]
    fn test_encrypt_round_trips_through_private_key() {
        let (private, public) = key_pair();
        let encoded = encrypt_with_key(&public, "123456").unwrap();
        assert_eq!(decrypt(&private, &encoded), "123456");
    }

    #[tokio::test]
    async fn test_encryptor_fetches_certificate_with_token() {
        let (private, public) = key_pair();
        let pem = public.to_public_key_pem(LineEnding::LF).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cert"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(pem))
            .expect(1)
            .mount(&server)
            .await;

        let encryptor = CertificateEncryptor::new(
            reqwest::Client::new(),
            format!("{}/cert", server.uri()),
            CertificateMarkers::default(),
        );
        let encoded = encryptor
            .encrypt(&AccessToken::new("tok-1"), "otp-value")
            .await
            .unwrap();
        assert_eq!(decrypt(&private, &encoded), "otp-value");
    }

    #[tokio::test]
    async fn test_encryptor_reports_rejected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let encryptor = CertificateEncryptor::new(
            reqwest::Client::new(),
            server.uri(),
            CertificateMarkers::default(),
        );
        let err = encryptor
            .encrypt(&AccessToken::new("tok-1"), "otp-value")
            .await
            .unwrap_err();
        assert!(matches!(err, EncryptionError::Rejected { status: 503 }));
    }
}
