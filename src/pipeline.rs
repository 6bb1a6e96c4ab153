//! Deployment pipeline
//!
//! Runs one deployment through its stages in strict order:
//! - fingerprint the build directory
//! - build provenance and gate on validation (no network before this)
//! - authenticate and verify domain ownership
//! - attest provenance
//! - assemble and validate both quilts
//! - upload artifacts and store the attested provenance
//! - atomic registry update
//!
//! A later stage never starts before the prior stage's result is final.
//! Once authentication has been attempted the backend session is released
//! on the way out, on success or failure.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::client::{
    AttestError, AttestResult, AttestationBackend, AttestationEvidence, DomainVerification,
    ErrorKind, StorageConfig, UploadResult,
};
use crate::fingerprint::{FileManifest, FingerprintConfig, FingerprintEngine, ManifestError};
use crate::provenance::{
    build_provenance, BuildContext, ProvenanceFormat, ProvenanceValidator, ValidationOptions,
};
use crate::quilt::{
    validate_submission, AttestationQuilt, DeploymentMetadata, DomainVerificationEvidence,
    IdentityAttestation, ManifestQuilt, ProvenanceAttestationEvidence, DEFAULT_MAX_QUILT_SIZE,
};
use crate::registry::{RegistryUpdate, RegistryUpdateResult};
use crate::signing::domain_verification_hash;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Manifest,
    Provenance,
    Validation,
    Authentication,
    DomainVerification,
    Attestation,
    Quilt,
    Storage,
    ProvenanceStorage,
    Registry,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Manifest => "manifest",
            Stage::Provenance => "provenance",
            Stage::Validation => "validation",
            Stage::Authentication => "authentication",
            Stage::DomainVerification => "domain_verification",
            Stage::Attestation => "attestation",
            Stage::Quilt => "quilt",
            Stage::Storage => "storage",
            Stage::ProvenanceStorage => "provenance_storage",
            Stage::Registry => "registry",
        }
    }

    /// Whether this stage talks to the backend
    pub fn is_remote(&self) -> bool {
        !matches!(
            self,
            Stage::Manifest | Stage::Provenance | Stage::Validation | Stage::Quilt
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("deployment failed at {stage}: {error}")]
pub struct DeploymentFailure {
    pub stage: Stage,
    /// Original cause
    pub error: AttestError,
    /// Validation findings, errors first, when validation was the cause
    pub findings: Vec<String>,
    /// Retries spent across the whole deployment
    pub retries: u32,
}

impl DeploymentFailure {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self.error.kind {
            ErrorKind::Cancelled => crate::cancel::EXIT_CODE_CANCELLED,
            ErrorKind::Manifest => 10,
            ErrorKind::Validation => 20,
            ErrorKind::Authentication => 30,
            ErrorKind::Attestation => 40,
            ErrorKind::RegistryConflict | ErrorKind::RolledBack => 50,
            ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Server => 60,
        }
    }
}

/// Everything a successful deployment produced
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub domain: String,
    pub manifest: FileManifest,
    pub manifest_hash: String,
    pub verification: DomainVerification,
    pub evidence: AttestationEvidence,
    pub manifest_quilt: ManifestQuilt,
    pub attestation_quilt: AttestationQuilt,
    pub upload: UploadResult,
    pub provenance_blob_id: String,
    pub registry: RegistryUpdateResult,
    /// Retries spent across all remote stages
    pub retries: u32,
    pub duration_ms: u64,
}

/// Pipeline tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub fingerprint: FingerprintConfig,
    pub provenance_format: ProvenanceFormat,
    pub validation: ValidationOptions,
    pub storage: StorageConfig,
    pub max_quilt_size: usize,
    /// Free-form label recorded in the manifest quilt
    pub deployment_target: String,
    /// Guard the registry write with the version read
    pub atomic_registry: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintConfig::default(),
            provenance_format: ProvenanceFormat::V11,
            validation: ValidationOptions::default(),
            storage: StorageConfig::default(),
            max_quilt_size: DEFAULT_MAX_QUILT_SIZE,
            deployment_target: "production".to_string(),
            atomic_registry: true,
        }
    }
}

/// Runs deployments against one backend
pub struct DeploymentPipeline {
    backend: Arc<dyn AttestationBackend>,
    options: PipelineOptions,
    cancel: CancelToken,
}

/// Retries spent so far, so failures can report them
#[derive(Debug, Default)]
struct Tally {
    retries: u32,
}

impl Tally {
    fn fail(&self, stage: Stage, error: AttestError) -> DeploymentFailure {
        let retries = self.retries + error.retries;
        warn!(stage = %stage, kind = %error.kind, code = %error.code, retries, "deployment stage failed");
        DeploymentFailure {
            stage,
            error,
            findings: Vec::new(),
            retries,
        }
    }
}

impl DeploymentPipeline {
    pub fn new(backend: Arc<dyn AttestationBackend>, options: PipelineOptions) -> Self {
        Self {
            backend,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Observe `token` while fingerprinting and between stages
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Deploy `directory` for `domain`; `signature` is the domain key's
    /// signature over the domain.
    ///
    /// Failures before authentication leave the backend untouched.
    pub async fn run(
        &self,
        directory: &Path,
        context: &BuildContext,
        domain: &str,
        signature: &str,
    ) -> Result<DeploymentResult, DeploymentFailure> {
        let outcome = self.execute(directory, context, domain, signature).await;
        if self.backend_touched(&outcome) {
            self.backend.disconnect().await;
        }
        outcome
    }

    fn backend_touched(&self, outcome: &Result<DeploymentResult, DeploymentFailure>) -> bool {
        match outcome {
            Ok(_) => true,
            Err(failure) => failure.stage >= Stage::Authentication,
        }
    }

    fn checkpoint(&self, tally: &Tally, next: Stage) -> Result<(), DeploymentFailure> {
        if self.cancel.is_cancelled() {
            return Err(tally.fail(next, AttestError::cancelled(next.as_str())));
        }
        Ok(())
    }

    async fn execute(
        &self,
        directory: &Path,
        context: &BuildContext,
        domain: &str,
        signature: &str,
    ) -> Result<DeploymentResult, DeploymentFailure> {
        let started = Instant::now();
        let mut tally = Tally::default();
        info!(domain, directory = %directory.display(), backend = %self.backend.kind(), "deployment started");

        // Local stages
        let manifest = self
            .fingerprint(directory.to_path_buf(), domain.to_string())
            .await
            .map_err(|e| tally.fail(Stage::Manifest, e))?;
        let manifest_hash = manifest
            .manifest_hash()
            .map_err(|e| tally.fail(Stage::Manifest, AttestError::manifest(e.to_string())))?;
        info!(files = manifest.total_files, bytes = manifest.total_size_bytes, %manifest_hash, "manifest generated");

        self.checkpoint(&tally, Stage::Provenance)?;
        context
            .check()
            .map_err(|e| tally.fail(Stage::Provenance, AttestError::validation(e.to_string())))?;
        let provenance = build_provenance(&manifest, context, self.options.provenance_format)
            .to_value()
            .map_err(|e| tally.fail(Stage::Provenance, AttestError::validation(e.to_string())))?;

        let validator = ProvenanceValidator::new(self.options.validation.clone());
        let report = validator.validate_against_manifest(&provenance, &manifest);
        if !report.is_valid {
            let mut failure = tally.fail(
                Stage::Validation,
                AttestError::validation(ProvenanceValidator::summary(&report)),
            );
            failure.findings = report.findings().map(String::from).collect();
            return Err(failure);
        }
        info!(severity = %report.severity, warnings = report.warnings.len(), "provenance validated");

        // Remote stages
        self.checkpoint(&tally, Stage::Authentication)?;
        self.backend
            .authenticate()
            .await
            .map_err(|e| tally.fail(Stage::Authentication, e))?;

        self.checkpoint(&tally, Stage::DomainVerification)?;
        let verification = self
            .backend
            .verify_domain_ownership(domain, signature)
            .await
            .map_err(|e| tally.fail(Stage::DomainVerification, e))?;
        tally.retries += verification.retry_count;
        if !verification.verified {
            let message = verification
                .error
                .clone()
                .unwrap_or_else(|| format!("ownership of {domain} could not be verified"));
            return Err(tally.fail(
                Stage::DomainVerification,
                AttestError::authentication(message),
            ));
        }

        self.checkpoint(&tally, Stage::Attestation)?;
        let evidence = self
            .backend
            .attest_provenance(&provenance, &manifest, context)
            .await
            .map_err(|e| tally.fail(Stage::Attestation, e))?;
        tally.retries += evidence.retries;

        let (manifest_quilt, attestation_quilt) = self
            .assemble_quilts(domain, signature, &manifest, context, &verification, &evidence)
            .map_err(|e| tally.fail(Stage::Quilt, e))?;

        self.checkpoint(&tally, Stage::Storage)?;
        let upload = self
            .backend
            .upload_artifacts(&manifest, directory, &self.options.storage)
            .await
            .map_err(|e| tally.fail(Stage::Storage, e))?;
        tally.retries += upload.retries;
        if !upload.failures.is_empty() {
            warn!(failed = upload.failures.len(), "some artifacts were not uploaded");
        }

        self.checkpoint(&tally, Stage::ProvenanceStorage)?;
        let provenance_blob_id = self
            .backend
            .store_provenance(&provenance, &evidence)
            .await
            .map_err(|e| tally.fail(Stage::ProvenanceStorage, e))?;

        self.checkpoint(&tally, Stage::Registry)?;
        let update = RegistryUpdate {
            domain: domain.to_string(),
            site_data: json!({
                "manifest_hash": manifest_hash,
                "manifest_quilt_hash": manifest_quilt.quilt_hash,
                "attestation_quilt_hash": attestation_quilt.quilt_hash,
                "provenance_blob_id": provenance_blob_id,
                "attestation_id": evidence.attestation_id,
                "blob_mapping": upload.blob_mapping,
                "network": self.options.storage.network,
                "commit_sha": context.sha,
                "deployed_at": Utc::now().to_rfc3339(),
            }),
            signature: signature.to_string(),
            atomic: self.options.atomic_registry,
        };
        let registry = self
            .backend
            .update_registry(&update)
            .await
            .map_err(|e| tally.fail(Stage::Registry, e))?;
        tally.retries += registry.retries;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            domain,
            version = %registry.new_version,
            transaction = %registry.transaction_id,
            retries = tally.retries,
            duration_ms,
            "deployment committed"
        );

        Ok(DeploymentResult {
            domain: domain.to_string(),
            manifest,
            manifest_hash,
            verification,
            evidence,
            manifest_quilt,
            attestation_quilt,
            upload,
            provenance_blob_id,
            registry,
            retries: tally.retries,
            duration_ms,
        })
    }

    async fn fingerprint(&self, directory: PathBuf, domain: String) -> AttestResult<FileManifest> {
        let engine = FingerprintEngine::new(self.options.fingerprint.clone())
            .map_err(|e| AttestError::manifest(e.to_string()))?
            .with_cancel(self.cancel.clone());
        let result = tokio::task::spawn_blocking(move || engine.generate(&directory, &domain, None))
            .await
            .map_err(|e| AttestError::manifest(format!("fingerprint worker panicked: {e}")))?;
        result.map_err(|e| match e {
            ManifestError::Cancelled => AttestError::cancelled("fingerprint"),
            other => AttestError::manifest(other.to_string()),
        })
    }

    fn assemble_quilts(
        &self,
        domain: &str,
        signature: &str,
        manifest: &FileManifest,
        context: &BuildContext,
        verification: &DomainVerification,
        evidence: &AttestationEvidence,
    ) -> AttestResult<(ManifestQuilt, AttestationQuilt)> {
        let now = Utc::now();
        let metadata = DeploymentMetadata {
            build_timestamp: context.build_finished_on.clone(),
            github_repo: context.repository.clone(),
            commit_sha: context.sha.clone(),
            workflow_ref: context.workflow_ref.clone().unwrap_or_default(),
            deployment_target: self.options.deployment_target.clone(),
        };
        let manifest_quilt = ManifestQuilt::assemble(domain, manifest, metadata, now)
            .map_err(|e| AttestError::validation(e.to_string()))?;

        let attestation_quilt = AttestationQuilt::assemble(
            domain,
            DomainVerificationEvidence {
                domain_verification_hash: domain_verification_hash(domain),
                domain_signature: signature.to_string(),
                signature_timestamp: verification.timestamp.clone(),
            },
            IdentityAttestation {
                hash: verification.attestation_hash.clone(),
                signature: verification.signature.clone(),
                timestamp: verification.timestamp.clone(),
                attestation_type: verification.attestation_type.clone(),
                run_id: context.run_id,
                repository: context.repository.clone(),
                workflow: context.workflow.clone(),
                commit_sha: context.sha.clone(),
                workflow_ref: context.workflow_ref.clone().unwrap_or_default(),
            },
            ProvenanceAttestationEvidence {
                cosign_signature: evidence.signature.clone(),
                attestation_id: evidence.attestation_id.clone(),
                sigstore_bundle: evidence.bundle.clone(),
                timestamp: evidence.timestamp.clone(),
                slsa_level: evidence.slsa_level,
                attestation_hash: evidence.attestation_hash.clone(),
                oidc_issuer: evidence.oidc_issuer.clone().unwrap_or_default(),
                certificate: evidence.certificate.clone(),
            },
            now,
        )
        .map_err(|e| AttestError::validation(e.to_string()))?;

        validate_submission(&manifest_quilt, &attestation_quilt, self.options.max_quilt_size)
            .map_err(|e| AttestError::validation(e.to_string()))?;
        info!(
            manifest_quilt = %manifest_quilt.quilt_hash,
            attestation_quilt = %attestation_quilt.quilt_hash,
            "quilts assembled"
        );
        Ok((manifest_quilt, attestation_quilt))
    }
}
