//! GitHub OIDC backend
//!
//! Authenticates with a short-lived identity token from the platform
//! issuer. Attestations come back as transparency-log signature bundles
//! with the signing certificate and the issuer that vouched for it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use attest_protocol::ops::{AuthMethod, AuthenticateRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cancel::CancelToken;
use crate::fingerprint::FileManifest;
use crate::provenance::{BuildContext, ValidationOptions};
use crate::registry::{RegistryStore, RegistryUpdate, RegistryUpdateResult};
use crate::retry::RetryPolicy;

use super::backend::AttestationBackend;
use super::capabilities::{BlobStore, IdentityTokenSource};
use super::channel::{evidence_from, BackendChannel};
use super::error::{AttestError, AttestResult};
use super::session::SessionInfo;
use super::transport::Transport;
use super::types::{
    AttestationEvidence, BackendKind, DomainVerification, HealthStatus, StorageConfig,
    UploadResult,
};

/// Issuer of GitHub Actions identity tokens
pub const GITHUB_OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// OIDC client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Audience requested for identity tokens
    pub audience: String,
    /// Only tokens from this issuer are presented
    pub expected_issuer: String,
    pub validation: ValidationOptions,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            audience: "site-attest".to_string(),
            expected_issuer: GITHUB_OIDC_ISSUER.to_string(),
            validation: ValidationOptions::default(),
        }
    }
}

/// Client for an OIDC and transparency-log backed service
pub struct OidcClient {
    channel: BackendChannel,
    tokens: Arc<dyn IdentityTokenSource>,
    config: OidcConfig,
}

impl OidcClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn IdentityTokenSource>,
        policy: RetryPolicy,
        config: OidcConfig,
    ) -> Self {
        Self {
            channel: BackendChannel::new(transport, policy),
            tokens,
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

    async fn token_request(&self) -> AttestResult<AuthenticateRequest> {
        let token = self.tokens.fetch_token(&self.config.audience).await?;
        if token.issuer != self.config.expected_issuer {
            return Err(AttestError::authentication(format!(
                "identity token issued by {}, expected {}",
                token.issuer, self.config.expected_issuer
            )));
        }
        Ok(AuthenticateRequest {
            method: AuthMethod::OidcToken {
                id_token: token.token,
                issuer: token.issuer,
            },
            region: None,
        })
    }
}

#[async_trait]
impl AttestationBackend for OidcClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Oidc
    }

    async fn authenticate(&self) -> AttestResult<SessionInfo> {
        if let Some(session) = self.channel.cached_session().await {
            return Ok(session);
        }
        let request = self.token_request().await?;
        let info = self.channel.authenticate(request).await?;
        if !info.reused {
            info!(backend = "oidc", expires_at = %info.expires_at, "authenticated");
        }
        Ok(info)
    }

    async fn verify_domain_ownership(
        &self,
        domain: &str,
        signature: &str,
    ) -> AttestResult<DomainVerification> {
        self.channel.verify_domain(domain, signature).await
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
        let value = &response.value;
        if value.certificate.is_none() || value.oidc_issuer.is_none() {
            return Err(AttestError::invalid_response(
                "signature bundle is missing its certificate or issuer",
            ));
        }
        if !value.bundle.is_object() {
            return Err(AttestError::invalid_response(
                "transparency-log bundle must be an object",
            ));
        }
        Ok(evidence_from(BackendKind::Oidc, response, provenance_sha256))
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
