//! Error types for federation metadata statements

use thiserror::Error;

/// Result type alias using FederationError
pub type Result<T> = std::result::Result<T, FederationError>;

/// Errors that can occur while issuing, publishing or verifying statements
#[derive(Error, Debug)]
pub enum FederationError {
    /// No usable key for the required algorithm/usage or key identifier
    #[error("Key not found for issuer '{issuer}': {detail}")]
    KeyNotFound { issuer: String, detail: String },

    /// Referenced signer or verifier issuer is not known
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Signature does not validate against the claimed issuer's keys
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Token could not be parsed
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Digest not present in the statement store
    #[error("Statement not found in store: {0}")]
    StoreMiss(String),

    /// Two issuers normalize to the same persisted path
    #[error("Issuers '{first}' and '{second}' both map to {path}")]
    PathCollision {
        first: String,
        second: String,
        path: String,
    },

    /// Locator URI does not belong to the configured base
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// Trust path cannot be built
    #[error("Invalid trust path for '{target}': {reason}")]
    InvalidTrustPath { target: String, reason: String },

    /// Key generation or key encoding failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FederationError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Structural and cryptographic failures never heal on retry; only
    /// store and key-file I/O might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::Io(_))
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(err: serde_json::Error) -> Self {
        FederationError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for FederationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::Base64(_)
            | ErrorKind::Crypto(_) => FederationError::SignatureVerification(err.to_string()),
            ErrorKind::InvalidToken | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                FederationError::MalformedToken(err.to_string())
            }
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::RsaFailedSigning => FederationError::Crypto(err.to_string()),
            _ => FederationError::SignatureVerification(err.to_string()),
        }
    }
}

impl From<rsa::Error> for FederationError {
    fn from(err: rsa::Error) -> Self {
        FederationError::Crypto(err.to_string())
    }
}

impl From<p256::elliptic_curve::Error> for FederationError {
    fn from(err: p256::elliptic_curve::Error) -> Self {
        FederationError::Crypto(err.to_string())
    }
}
