//! Hardware trusted-execution backend
//!
//! Authenticates with an Ed25519 challenge signed by the deployer's key.
//! The enclave answers verification and attestation calls with a hardware
//! attestation document, which is required on every positive answer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use attest_protocol::ops::{AuthMethod, AuthenticateRequest};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::fingerprint::FileManifest;
use crate::provenance::{BuildContext, ValidationOptions};
use crate::registry::{RegistryStore, RegistryUpdate, RegistryUpdateResult};
use crate::retry::RetryPolicy;

use super::backend::AttestationBackend;
use super::capabilities::{BlobStore, Signer};
use super::channel::{evidence_from, BackendChannel};
use super::error::{AttestError, AttestResult};
use super::session::SessionInfo;
use super::transport::Transport;
use super::types::{
    AttestationEvidence, BackendKind, DomainVerification, HealthStatus, StorageConfig,
    UploadResult,
};

/// TEE client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Requested enclave region
    pub region: Option<String>,
    /// Attestation label the enclave is expected to report
    pub attestation_type: String,
    pub validation: ValidationOptions,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            region: None,
            attestation_type: "aws-nitro".to_string(),
            validation: ValidationOptions::default(),
        }
    }
}

/// Client for a hardware trusted-execution backend
pub struct TeeClient {
    channel: BackendChannel,
    signer: Arc<dyn Signer>,
    config: TeeConfig,
}

impl TeeClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
        policy: RetryPolicy,
        config: TeeConfig,
    ) -> Self {
        Self {
            channel: BackendChannel::new(transport, policy),
            signer,
            config,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.channel.set_cancel(cancel);
        self
    }

    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.channel.set_blob_store(store);
        self
    }

    pub fn with_registry_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.channel.set_registry_store(store);
        self
    }

    fn challenge_request(&self) -> AuthenticateRequest {
        let challenge = format!(
            "{}:{}",
            self.signer.fingerprint(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        AuthenticateRequest {
            method: AuthMethod::Ed25519Challenge {
                public_key: self.signer.public_key(),
                signature: self.signer.sign(challenge.as_bytes()),
                challenge,
            },
            region: self.config.region.clone(),
        }
    }
}

#[async_trait]
impl AttestationBackend for TeeClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Tee
    }

    async fn authenticate(&self) -> AttestResult<SessionInfo> {
        let info = self.channel.authenticate(self.challenge_request()).await?;
        if !info.reused {
            info!(backend = "tee", expires_at = %info.expires_at, "authenticated");
        }
        Ok(info)
    }

    async fn verify_domain_ownership(
        &self,
        domain: &str,
        signature: &str,
    ) -> AttestResult<DomainVerification> {
        let verification = self.channel.verify_domain(domain, signature).await?;
        if verification.verified {
            if verification
                .attestation_document
                .as_deref()
                .map_or(true, str::is_empty)
            {
                return Err(AttestError::invalid_response(
                    "enclave confirmed the domain without an attestation document",
                ));
            }
            if verification.attestation_type != self.config.attestation_type {
                warn!(
                    expected = %self.config.attestation_type,
                    actual = %verification.attestation_type,
                    "unexpected enclave attestation type"
                );
            }
        }
        Ok(verification)
    }

    async fn attest_provenance(
        &self,
        provenance: &Value,
        manifest: &FileManifest,
        context: &BuildContext,
    ) -> AttestResult<AttestationEvidence> {
        let (response, provenance_sha256) = self
            .channel
            .attest(provenance, manifest, context, &self.config.validation)
            .await?;
        if response.value.bundle.is_null() {
            return Err(AttestError::invalid_response(
                "enclave attestation carried no hardware document",
            ));
        }
        Ok(evidence_from(BackendKind::Tee, response, provenance_sha256))
    }

    async fn upload_artifacts(
        &self,
        manifest: &FileManifest,
        directory: &Path,
        storage: &StorageConfig,
    ) -> AttestResult<UploadResult> {
        self.channel.upload_artifacts(manifest, directory, storage).await
    }

    async fn store_provenance(
        &self,
        provenance: &Value,
        evidence: &AttestationEvidence,
    ) -> AttestResult<String> {
        self.channel.store_provenance(provenance, evidence).await
    }

    async fn update_registry(&self, update: &RegistryUpdate) -> AttestResult<RegistryUpdateResult> {
        self.channel.update_registry(update).await
    }

    async fn health_check(&self) -> AttestResult<HealthStatus> {
        self.channel.health_check().await
    }

    async fn disconnect(&self) {
        self.channel.disconnect().await;
    }
}
