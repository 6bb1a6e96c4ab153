//! Error codes for backend responses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned by attestation backends.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Credentials or session were rejected.
    Unauthorized,
    /// The session token expired; re-authenticate.
    SessionExpired,
    /// A domain or request signature did not verify.
    InvalidSignature,
    /// The backend refused to sign or witness the provenance.
    AttestationRefused,
    /// The domain record advanced since it was read.
    VersionConflict,
    /// The backend detected and reverted a partial registry write.
    RolledBack,
    /// The request body exceeds the backend size limit.
    PayloadTooLarge,
    /// Too many requests; honor `retry_after_seconds`.
    RateLimited,
    /// The backend is temporarily unavailable.
    Unavailable,
    /// The backend timed out while processing the request.
    Timeout,
    /// Unexpected backend failure.
    Internal,
    /// The referenced object does not exist.
    NotFound,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::AttestationRefused => "ATTESTATION_REFUSED",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::RolledBack => "ROLLED_BACK",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
            Self::NotFound => "NOT_FOUND",
        }
    }

    /// Whether the backend contract marks this code retryable when the
    /// response carries no explicit `retryable` flag.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unavailable | Self::Timeout | Self::VersionConflict
        )
    }

    /// HTTP-style status conventionally paired with this code.
    pub fn default_status(&self) -> u16 {
        match self {
            Self::InvalidRequest | Self::InvalidSignature => 400,
            Self::Unauthorized | Self::SessionExpired => 401,
            Self::NotFound => 404,
            Self::VersionConflict | Self::RolledBack => 409,
            Self::PayloadTooLarge => 413,
            Self::AttestationRefused => 422,
            Self::RateLimited => 429,
            Self::Internal => 500,
            Self::Unavailable => 503,
            Self::Timeout => 504,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried by a failed backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Explicit retryability; falls back to [`ErrorCode::default_retryable`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Server hint for when to retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// Optional machine-readable details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    /// Create a new remote error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: None,
            retry_after_seconds: None,
            data: None,
        }
    }

    /// Override the retryable flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Attach machine-readable data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Effective retryability of this error.
    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or_else(|| self.code.default_retryable())
    }

    /// Create a VERSION_CONFLICT error.
    pub fn version_conflict(domain: &str, expected: Option<&str>, actual: Option<&str>) -> Self {
        Self::new(
            ErrorCode::VersionConflict,
            format!("domain '{}' version advanced since it was read", domain),
        )
        .with_data(serde_json::json!({
            "domain": domain,
            "expected_version": expected,
            "actual_version": actual,
        }))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}
