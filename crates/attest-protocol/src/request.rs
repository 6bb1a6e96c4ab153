//! Backend request envelope.

use serde::{Deserialize, Serialize};

use crate::ops::Operation;

/// Request envelope sent to an attestation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// API version segment (see [`crate::API_VERSION`]).
    pub api_version: String,
    /// Operation to perform.
    pub op: Operation,
    /// Unique per attempt; used for log correlation.
    pub request_id: String,
    /// Stable across retries of one logical operation.
    pub idempotency_key: String,
    /// Session token obtained from `authenticate`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl BackendRequest {
    /// Create a request for the given operation.
    pub fn new(
        op: Operation,
        request_id: impl Into<String>,
        idempotency_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            op,
            request_id: request_id.into(),
            idempotency_key: idempotency_key.into(),
            session_token: None,
            payload,
        }
    }

    /// Attach a session token.
    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}
