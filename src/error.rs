//! Error types for pubwire
//!
//! All failures in the crate are converted to `FederationError` and
//! returned as values. Resolution and delivery errors never cross the
//! dispatcher boundary as panics.

use thiserror::Error;

/// Crate-wide error type
///
/// Resolution failures carry enough structure for callers to choose a
/// policy: a tombstoned remote (HTTP 404/410) is a strong remove signal,
/// everything else network-shaped is retryable.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Actor identifier could not be classified (not a URI, handle, or object)
    #[error("Invalid actor identifier: {0}")]
    InvalidActorIdentifier(String),

    /// Actor URL failed basic validation (scheme, host)
    #[error("Invalid actor URL: {0}")]
    InvalidActorUrl(String),

    /// Network-level failure after timeouts/redirect limits
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// 2xx response with an unparseable or non-object body
    #[error("Invalid JSON in remote document: {0}")]
    InvalidJson(String),

    /// Actor document has no usable publicKey.publicKeyPem
    #[error("No public key published by {0}")]
    NoPublicKey(String),

    /// Actor document has no inbox
    #[error("No inbox published by {0}")]
    NoInbox(String),

    /// Signature header missing or not matching the key="value" grammar
    #[error("Malformed signature header: {0}")]
    SignatureParse(String),

    /// Digest header does not match the received body
    #[error("Digest mismatch between header and body")]
    DigestMismatch,

    /// RSA verification failed, or no usable key could be obtained
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Remote deterministically reports deletion (HTTP 404/410)
    #[error("Remote resource is gone (HTTP {status})")]
    Tombstoned { status: u16 },

    /// Delivery attempt rejected with status >= 400
    #[error("Remote returned HTTP {status}")]
    RemoteHttp { status: u16 },

    /// PEM encoding/decoding of key material failed
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    /// Follower store error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FederationError {
    /// True iff the failure carries HTTP status 404 or 410.
    ///
    /// Distinguishes a confirmed remote deletion from transient
    /// unreachability; followers cleanup keys off this.
    pub fn is_tombstone(&self) -> bool {
        matches!(
            self,
            FederationError::Tombstoned { status: 404 | 410 }
                | FederationError::RemoteHttp { status: 404 | 410 }
        )
    }

    /// HTTP status a host controller should answer an inbound request with.
    pub fn http_status(&self) -> u16 {
        match self {
            FederationError::SignatureParse(_)
            | FederationError::DigestMismatch
            | FederationError::SignatureVerification(_) => 401,
            FederationError::InvalidActorIdentifier(_)
            | FederationError::InvalidActorUrl(_) => 400,
            FederationError::FetchFailed(_)
            | FederationError::InvalidJson(_)
            | FederationError::NoPublicKey(_)
            | FederationError::NoInbox(_)
            | FederationError::Tombstoned { .. }
            | FederationError::RemoteHttp { .. } => 502,
            FederationError::KeyEncoding(_)
            | FederationError::Database(_)
            | FederationError::Config(_)
            | FederationError::Internal(_) => 500,
        }
    }
}

impl From<reqwest::Error> for FederationError {
    fn from(err: reqwest::Error) -> Self {
        FederationError::FetchFailed(err.to_string())
    }
}

impl From<config::ConfigError> for FederationError {
    fn from(err: config::ConfigError) -> Self {
        FederationError::Config(err.to_string())
    }
}

/// Result type alias using FederationError
pub type Result<T> = std::result::Result<T, FederationError>;
