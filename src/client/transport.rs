//! Transport layer for backend clients
//!
//! Abstracts the wire for testability:
//! - [`Transport`]: one request envelope in, one response envelope out
//! - [`HttpTransport`]: JSON over HTTPS via `reqwest`
//! - [`MockBackend`](crate::mock::MockBackend): in-process backend for tests

use std::time::Duration;

use async_trait::async_trait;
use attest_protocol::{BackendRequest, BackendResponse};
use tracing::debug;

/// Transport for backend request envelopes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and wait for its response
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode request: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode response: {0}")]
    Decode(serde_json::Error),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Backend base URL (`https://attest.example.com`)
    pub endpoint: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl HttpConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
            user_agent: format!("site-attest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// JSON-over-HTTPS transport.
///
/// Requests are POSTed to `{endpoint}/{api_version}/{op}`. Backends answer
/// with a response envelope for both success and failure; a non-envelope
/// body maps to [`TransportError::Status`].
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url_for(&self, request: &BackendRequest) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            request.api_version,
            request.op.as_str()
        )
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.config.timeout)
        } else if err.is_connect() {
            TransportError::ConnectionFailed(err.to_string())
        } else {
            TransportError::Client(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, TransportError> {
        let url = self.url_for(request);
        let body = serde_json::to_vec(request).map_err(TransportError::Encode)?;
        debug!(op = %request.op, request_id = %request.request_id, %url, "sending backend request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", &request.idempotency_key)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;
        match serde_json::from_slice::<BackendResponse>(&bytes) {
            Ok(envelope) => Ok(envelope),
            Err(e) if (200..300).contains(&status) => Err(TransportError::Decode(e)),
            Err(_) => Err(TransportError::Status {
                status,
                body: String::from_utf8_lossy(&bytes).chars().take(512).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_protocol::Operation;

    #[test]
    fn test_url_layout() {
        let transport = HttpTransport::new(HttpConfig::new("https://attest.example.com/")).unwrap();
        let request = BackendRequest::new(Operation::VerifyDomain, "r1", "k1", serde_json::json!({}));
        assert_eq!(
            transport.url_for(&request),
            "https://attest.example.com/v1/verify_domain"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timed out after 1500ms");
    }
}
