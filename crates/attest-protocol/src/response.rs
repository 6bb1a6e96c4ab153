//! Backend response envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Response envelope returned by an attestation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Echoed request ID for correlation.
    pub request_id: String,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// HTTP-style status code.
    pub status: u16,
    /// Operation-specific payload (present when `ok`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Error details (present when not `ok`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl BackendResponse {
    /// Create a success response.
    pub fn success(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            status: 200,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error response using the code's conventional status.
    pub fn failure(request_id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            request_id: request_id.into(),
            ok: false,
            status: error.code.default_status(),
            payload: None,
            error: Some(error),
        }
    }

    /// Decode the payload into a typed response.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let value = self.payload.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value)
    }
}
