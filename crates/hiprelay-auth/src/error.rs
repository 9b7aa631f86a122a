//! Error types for token acquisition and payload encryption.

/// Errors returned by the gateway session endpoint exchange.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// No response was received (connect failure, timeout, reset).
    #[error("Session endpoint unreachable: {0}")]
    Unreachable(String),

    /// The session endpoint answered with a non-success status.
    #[error("Session endpoint rejected credentials: status {status}")]
    Rejected {
        /// HTTP status returned by the session endpoint.
        status: u16,
        /// Raw response body, kept for diagnostics.
        body: String,
    },

    /// The response did not carry a usable access token.
    #[error("Malformed session response: {0}")]
    MalformedResponse(String),

    /// The outbound request could not be built.
    #[error("Failed to build session request: {0}")]
    Request(String),
}

/// Errors returned while encrypting a payload field with the gateway certificate.
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    /// No response was received from the certificate endpoint.
    #[error("Certificate endpoint unreachable: {0}")]
    Unreachable(String),

    /// The certificate endpoint answered with a non-success status.
    #[error("Certificate endpoint returned status {status}")]
    Rejected {
        /// HTTP status returned by the certificate endpoint.
        status: u16,
    },

    /// The certificate body did not contain a usable RSA public key.
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// RSA encryption itself failed (e.g. plaintext too long for the key).
    #[error("Encryption failed: {0}")]
    Encrypt(String),
}

impl EncryptionError {
    /// Returns `true` when the failure happened before a certificate was received.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_display() {
        let err = TokenError::Rejected {
            status: 401,
            body: "{}".into(),
        };
        assert_eq!(
            err.to_string(),
            "Session endpoint rejected credentials: status 401"
        );
    }

    #[test]
    fn test_encryption_error_is_upstream() {
        assert!(EncryptionError::Unreachable("timeout".into()).is_upstream());
        assert!(EncryptionError::Rejected { status: 503 }.is_upstream());
        assert!(!EncryptionError::InvalidCertificate("bad".into()).is_upstream());
        assert!(!EncryptionError::Encrypt("too long".into()).is_upstream());
    }
}
