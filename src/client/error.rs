//! Tagged error for remote operations
//!
//! Every backend failure surfaces as one [`AttestError`]. Callers dispatch
//! on [`ErrorKind`]; the retry orchestrator looks only at `retryable`.

use std::fmt;
use std::time::Duration;

use attest_protocol::{ErrorCode, RemoteError};
use serde::Serialize;

use super::transport::TransportError;

/// Stable codes for failures that never reach a backend
pub mod codes {
    pub const MANIFEST_FAILED: &str = "MANIFEST_FAILED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CANCELLED: &str = "CANCELLED";
    pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";
    pub const SIGNING_FAILED: &str = "SIGNING_FAILED";
    pub const UPLOAD_FAILED: &str = "UPLOAD_FAILED";
}

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Discovery or hashing failure
    Manifest,
    /// Provenance or request validation failure
    Validation,
    /// Transport-level failure
    Connection,
    /// A call exceeded its timeout
    Timeout,
    /// Credentials or session rejected
    Authentication,
    /// Backend refused to sign or witness
    Attestation,
    /// Optimistic-concurrency version mismatch
    RegistryConflict,
    /// Backend reverted a partial registry write
    RolledBack,
    /// Generic backend failure
    Server,
    /// Cancelled before completion
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Manifest => "manifest",
            ErrorKind::Validation => "validation",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Attestation => "attestation",
            ErrorKind::RegistryConflict => "registry_conflict",
            ErrorKind::RolledBack => "rolled_back",
            ErrorKind::Server => "server",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Map a wire code to a kind
    pub fn from_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidRequest | ErrorCode::PayloadTooLarge => ErrorKind::Validation,
            ErrorCode::Unauthorized | ErrorCode::SessionExpired | ErrorCode::InvalidSignature => {
                ErrorKind::Authentication
            }
            ErrorCode::AttestationRefused => ErrorKind::Attestation,
            ErrorCode::VersionConflict => ErrorKind::RegistryConflict,
            ErrorCode::RolledBack => ErrorKind::RolledBack,
            ErrorCode::Timeout => ErrorKind::Timeout,
            ErrorCode::RateLimited
            | ErrorCode::Unavailable
            | ErrorCode::Internal
            | ErrorCode::NotFound => ErrorKind::Server,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote operation error
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{kind} error [{code}]: {message}")]
pub struct AttestError {
    pub kind: ErrorKind,
    /// Stable machine-readable code
    pub code: String,
    /// HTTP-style status when a backend answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub retryable: bool,
    /// Server hint for the next attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    /// Retries spent before this error surfaced
    pub retries: u32,
    pub message: String,
}

/// Result alias for remote operations
pub type AttestResult<T> = Result<T, AttestError>;

impl AttestError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            status_code: None,
            retryable: false,
            retry_after: None,
            retries: 0,
            message: message.into(),
        }
    }

    pub fn manifest(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Manifest, codes::MANIFEST_FAILED, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, codes::VALIDATION_FAILED, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, codes::CONNECTION_FAILED, message).retryable(true)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            codes::TIMEOUT,
            format!("no response within {}ms", after.as_millis()),
        )
        .retryable(true)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Authentication,
            ErrorCode::Unauthorized.as_str(),
            message,
        )
    }

    pub fn attestation(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Attestation,
            ErrorCode::AttestationRefused.as_str(),
            message,
        )
    }

    pub fn registry_conflict(domain: &str, expected: Option<&str>, actual: Option<&str>) -> Self {
        Self::new(
            ErrorKind::RegistryConflict,
            ErrorCode::VersionConflict.as_str(),
            format!(
                "{domain}: expected version {}, found {}",
                expected.unwrap_or("none"),
                actual.unwrap_or("none")
            ),
        )
        .retryable(true)
    }

    pub fn rolled_back(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RolledBack, ErrorCode::RolledBack.as_str(), message)
    }

    pub fn server(status_code: u16, message: impl Into<String>, retryable: bool) -> Self {
        let mut err = Self::new(ErrorKind::Server, ErrorCode::Internal.as_str(), message)
            .retryable(retryable);
        err.status_code = Some(status_code);
        err
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            codes::CANCELLED,
            format!("{operation} cancelled"),
        )
    }

    /// Cancellation that interrupted a backoff after `cause`
    pub fn cancelled_after(operation: &str, cause: &AttestError) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            codes::CANCELLED,
            format!("{operation} cancelled after {} [{}]: {}", cause.kind, cause.code, cause.message),
        )
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, codes::INVALID_RESPONSE, message)
    }

    /// Map a backend error payload, honoring its explicit retryability
    pub fn from_remote(error: &RemoteError, status_code: u16) -> Self {
        let mut err = Self::new(ErrorKind::from_code(error.code), error.code.as_str(), &error.message)
            .retryable(error.is_retryable());
        err.status_code = Some(status_code);
        err.retry_after = error.retry_after_seconds.map(Duration::from_secs);
        err
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<TransportError> for AttestError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(after) => AttestError::timeout(after),
            TransportError::Status { status, body } => {
                AttestError::server(status, body, status >= 500 || status == 429)
            }
            TransportError::Decode(e) => AttestError::invalid_response(e.to_string()),
            TransportError::Encode(e) => AttestError::validation(e.to_string()),
            other => AttestError::connection(other.to_string()),
        }
    }
}
