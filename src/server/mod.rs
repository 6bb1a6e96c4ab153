//! Server-mediated deployment
//!
//! Instead of driving each backend operation itself, a client can submit
//! both quilts in one request and let the server verify, store and register.
//! Long-running deployments are followed by polling their status until a
//! terminal state is reported.

use std::sync::Arc;
use std::time::Duration;

use attest_protocol::ops::{
    ClientInfo, DeploymentRequest, DeploymentResponse, StatusRequest, StatusResponse,
};
use attest_protocol::Operation;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::client::{AttestError, AttestResult, BackendChannel, ErrorKind, Network, Transport};
use crate::quilt::{validate_submission, AttestationQuilt, ManifestQuilt, DEFAULT_MAX_QUILT_SIZE};
use crate::retry::{Attempted, RetryPolicy};

/// Code reported when the server declines without its own code
pub const DEPLOYMENT_FAILED: &str = "DEPLOYMENT_FAILED";

/// Default interval between status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default ceiling on total polling time
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Client metadata for this build
pub fn client_info(run_id: impl Into<String>, repository: impl Into<String>) -> ClientInfo {
    ClientInfo {
        user_agent: format!("site-attest/{}", env!("CARGO_PKG_VERSION")),
        run_id: run_id.into(),
        repository: repository.into(),
        action_version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Turn a declined submission into an error
fn check_response(response: DeploymentResponse) -> AttestResult<DeploymentResponse> {
    if response.success {
        return Ok(response);
    }
    let code = response
        .error_code
        .clone()
        .unwrap_or_else(|| DEPLOYMENT_FAILED.to_string());
    let message = response
        .error
        .clone()
        .unwrap_or_else(|| "deployment declined".to_string());
    let mut err = AttestError::new(ErrorKind::Server, code, message).retryable(response.retry_after.is_some());
    if let Some(seconds) = response.retry_after {
        err = err.with_retry_after(Duration::from_secs(seconds));
    }
    Err(err)
}

/// Submits deployments and follows their progress
pub struct DeploymentClient {
    channel: BackendChannel,
    client_info: ClientInfo,
    max_quilt_size: usize,
}

impl DeploymentClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, client_info: ClientInfo) -> Self {
        Self {
            channel: BackendChannel::new(transport, policy),
            client_info,
            max_quilt_size: DEFAULT_MAX_QUILT_SIZE,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.channel.set_cancel(cancel);
        self
    }

    pub fn with_max_quilt_size(mut self, max_bytes: usize) -> Self {
        self.max_quilt_size = max_bytes;
        self
    }

    /// Assemble a request from sealed quilts
    pub fn build_request(
        &self,
        manifest: &ManifestQuilt,
        attestation: &AttestationQuilt,
        network: Network,
        deployment_target: &str,
    ) -> AttestResult<DeploymentRequest> {
        let request = DeploymentRequest {
            domain: manifest.domain.clone(),
            manifest_quilt: manifest
                .to_value()
                .map_err(|e| AttestError::validation(e.to_string()))?,
            attestation_quilt: attestation
                .to_value()
                .map_err(|e| AttestError::validation(e.to_string()))?,
            network: network.to_string(),
            client_info: self.client_info.clone(),
            deployment_target: deployment_target.to_string(),
        };
        self.validate_request(&request)?;
        Ok(request)
    }

    /// Reject requests the server would refuse, before any network call
    pub fn validate_request(&self, request: &DeploymentRequest) -> AttestResult<()> {
        if request.domain.trim().is_empty() {
            return Err(AttestError::validation("deployment requires a domain"));
        }
        request
            .network
            .parse::<Network>()
            .map_err(AttestError::validation)?;

        let manifest: ManifestQuilt = serde_json::from_value(request.manifest_quilt.clone())
            .map_err(|e| AttestError::validation(format!("manifest quilt: {e}")))?;
        let attestation: AttestationQuilt = serde_json::from_value(request.attestation_quilt.clone())
            .map_err(|e| AttestError::validation(format!("attestation quilt: {e}")))?;
        validate_submission(&manifest, &attestation, self.max_quilt_size)
            .map_err(|e| AttestError::validation(e.to_string()))?;
        if manifest.domain != request.domain {
            return Err(AttestError::validation(format!(
                "quilts are for {}, request is for {}",
                manifest.domain, request.domain
            )));
        }
        Ok(())
    }

    /// Submit a deployment under the retry policy
    pub async fn submit_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> AttestResult<Attempted<DeploymentResponse>> {
        self.validate_request(request)?;
        let response = self
            .channel
            .call_checked(Operation::SubmitDeployment, request, check_response)
            .await?;
        info!(
            domain = %request.domain,
            request_id = %response.value.request_id,
            retries = response.retries,
            "deployment submitted"
        );
        Ok(response)
    }

    /// Current status of a submitted deployment
    pub async fn get_status(&self, request_id: &str) -> AttestResult<StatusResponse> {
        let request = StatusRequest {
            request_id: request_id.to_string(),
        };
        let response: Attempted<StatusResponse> =
            self.channel.call(Operation::DeploymentStatus, &request).await?;
        Ok(response.value)
    }

    /// Poll every `interval` until a terminal status or `max_wait` elapses
    pub async fn poll_until_complete(
        &self,
        request_id: &str,
        interval: Duration,
        max_wait: Duration,
    ) -> AttestResult<StatusResponse> {
        let started = Instant::now();
        loop {
            let status = self.get_status(request_id).await?;
            debug!(
                request_id,
                status = ?status.status,
                progress = status.progress_percentage,
                step = %status.current_step,
                "deployment status"
            );
            if status.status.is_terminal() {
                return Ok(status);
            }
            if started.elapsed() + interval > max_wait {
                return Err(AttestError::timeout(max_wait));
            }
            if !self.channel.cancel_token().sleep(interval).await {
                return Err(AttestError::cancelled("status polling"));
            }
        }
    }
}
