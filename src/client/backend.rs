//! The backend capability interface
//!
//! Callers hold an `Arc<dyn AttestationBackend>` and never name a variant.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::fingerprint::FileManifest;
use crate::provenance::BuildContext;
use crate::registry::{RegistryUpdate, RegistryUpdateResult};

use super::error::AttestResult;
use super::session::SessionInfo;
use super::types::{
    AttestationEvidence, BackendKind, DomainVerification, HealthStatus, StorageConfig,
    UploadResult,
};

/// Operations every attestation backend supports
#[async_trait]
pub trait AttestationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Establish a session; a fresh cached session is reused
    async fn authenticate(&self) -> AttestResult<SessionInfo>;

    /// Confirm that `signature` over `domain` matches the registered key.
    ///
    /// Exhausted transient failures return `verified: false` with the retry
    /// count instead of an error.
    async fn verify_domain_ownership(
        &self,
        domain: &str,
        signature: &str,
    ) -> AttestResult<DomainVerification>;

    /// Have the backend sign or witness `provenance`
    async fn attest_provenance(
        &self,
        provenance: &Value,
        manifest: &FileManifest,
        context: &BuildContext,
    ) -> AttestResult<AttestationEvidence>;

    /// Upload every artifact named by `manifest` from `directory`
    async fn upload_artifacts(
        &self,
        manifest: &FileManifest,
        directory: &Path,
        storage: &StorageConfig,
    ) -> AttestResult<UploadResult>;

    /// Persist the attested provenance; returns its blob id
    async fn store_provenance(
        &self,
        provenance: &Value,
        evidence: &AttestationEvidence,
    ) -> AttestResult<String>;

    /// Versioned write of the domain record
    async fn update_registry(&self, update: &RegistryUpdate) -> AttestResult<RegistryUpdateResult>;

    async fn health_check(&self) -> AttestResult<HealthStatus>;

    /// Stop pending retries and release the session
    async fn disconnect(&self);
}
