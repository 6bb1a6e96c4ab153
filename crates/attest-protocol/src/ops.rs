//! Operation-specific types.

pub mod attest;
pub mod auth;
pub mod deployment;
pub mod domain;
pub mod health;
pub mod registry;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use attest::{AttestContext, AttestProvenanceRequest, AttestProvenanceResponse};
pub use auth::{AuthMethod, AuthenticateRequest, AuthenticateResponse};
pub use deployment::{
    BackendAttestationSummary, ClientInfo, DeploymentRequest, DeploymentResponse, DeploymentStatus,
    ProvenanceStorageSummary, RegistrySummary, StatusRequest, StatusResponse, StorageSummary,
};
pub use domain::{VerifyDomainRequest, VerifyDomainResponse};
pub use health::HealthResponse;
pub use registry::{DomainRecord, GetDomainRecordRequest, UpdateRegistryRequest, UpdateRegistryResponse};
pub use storage::{StoreProvenanceRequest, StoreProvenanceResponse, UploadBlobRequest, UploadBlobResponse};

/// Operations understood by an attestation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Establish a session.
    Authenticate,
    /// Release a session.
    EndSession,
    /// Confirm a domain signature against the registered key.
    VerifyDomain,
    /// Sign or witness a provenance document.
    AttestProvenance,
    /// Store one artifact blob.
    UploadBlob,
    /// Store the attested provenance.
    StoreProvenance,
    /// Read the current registry record for a domain.
    GetDomainRecord,
    /// Write a new registry record.
    UpdateRegistry,
    /// Liveness probe.
    Health,
    /// Submit a whole deployment to a server-mediated backend.
    SubmitDeployment,
    /// Poll a submitted deployment.
    DeploymentStatus,
}

impl Operation {
    /// Endpoint path segment for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::EndSession => "end_session",
            Self::VerifyDomain => "verify_domain",
            Self::AttestProvenance => "attest_provenance",
            Self::UploadBlob => "upload_blob",
            Self::StoreProvenance => "store_provenance",
            Self::GetDomainRecord => "get_domain_record",
            Self::UpdateRegistry => "update_registry",
            Self::Health => "health",
            Self::SubmitDeployment => "submit_deployment",
            Self::DeploymentStatus => "deployment_status",
        }
    }

    /// Whether the operation requires an established session.
    pub fn requires_session(&self) -> bool {
        !matches!(
            self,
            Self::Authenticate | Self::Health | Self::SubmitDeployment | Self::DeploymentStatus
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
