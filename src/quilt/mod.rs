//! Transport bundles ("quilts")
//!
//! A deployment ships two quilts: the manifest quilt (file hashes plus
//! deployment metadata) and the attestation quilt (domain signature,
//! identity attestation, provenance attestation). Each carries a
//! `quilt_hash` over the JCS serialization of every other field, computed
//! after assembly. Any change to the payload invalidates it.
//!
//! Only the file-hash-bearing manifest quilt shape is produced or accepted.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::fingerprint::{FileEntry, FileManifest};
use crate::provenance::lookup;

/// Quilt wire format version
pub const QUILT_VERSION: &str = "1.0";

/// Default serialized size ceiling (10 MiB)
pub const DEFAULT_MAX_QUILT_SIZE: usize = 10 * 1024 * 1024;

const MANIFEST_REQUIRED: &[&str] = &[
    "files_manifest.files",
    "files_manifest.total_files",
    "files_manifest.total_size_bytes",
    "files_manifest.manifest_hash",
    "files_manifest.created_at",
    "metadata.build_timestamp",
    "metadata.github_repo",
    "metadata.commit_sha",
    "metadata.workflow_ref",
    "metadata.deployment_target",
];

const ATTESTATION_REQUIRED: &[&str] = &[
    "domain_verification.domain_verification_hash",
    "domain_verification.domain_signature",
    "domain_verification.signature_timestamp",
    "github_attestation.hash",
    "github_attestation.signature",
    "github_attestation.timestamp",
    "github_attestation.attestation_type",
    "provenance_attestation.attestation_id",
    "provenance_attestation.attestation_hash",
    "provenance_attestation.cosign_signature",
    "provenance_attestation.timestamp",
    "provenance_attestation.slsa_level",
];

/// Quilt errors
#[derive(Debug, thiserror::Error)]
pub enum QuiltError {
    #[error("Quilt must be a JSON object")]
    NotAnObject,

    #[error("Quilt is missing required field: {0}")]
    MissingField(String),

    #[error("Unknown quilt type: {0}")]
    UnknownType(String),

    #[error("Unsupported quilt version: {0}")]
    UnsupportedVersion(String),

    #[error("Quilt hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Quilt is {size} bytes, exceeding the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("Manifest summary is inconsistent: {0}")]
    InconsistentManifest(String),

    #[error("Quilts name different domains: {manifest} vs {attestation}")]
    DomainMismatch { manifest: String, attestation: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("JCS canonicalization error: {0}")]
    JcsError(String),
}

/// Quilt type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuiltType {
    Manifest,
    Attestation,
}

impl QuiltType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuiltType::Manifest => "manifest",
            QuiltType::Attestation => "attestation",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "manifest" => Some(QuiltType::Manifest),
            "attestation" => Some(QuiltType::Attestation),
            _ => None,
        }
    }
}

/// Manifest section of a manifest quilt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesManifest {
    pub files: Vec<FileEntry>,
    pub total_files: usize,
    pub total_size_bytes: u64,
    /// SHA-256 over JCS(files)
    pub manifest_hash: String,
    pub created_at: String,
}

/// Where and from what the deployment was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    pub build_timestamp: String,
    pub github_repo: String,
    pub commit_sha: String,
    pub workflow_ref: String,
    pub deployment_target: String,
}

/// Manifest quilt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestQuilt {
    pub quilt_type: QuiltType,
    pub quilt_version: String,
    pub domain: String,
    pub files_manifest: FilesManifest,
    pub metadata: DeploymentMetadata,
    pub created_at: String,
    pub quilt_hash: String,
}

/// Proof that the deployer controls the domain key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerificationEvidence {
    pub domain_verification_hash: String,
    pub domain_signature: String,
    pub signature_timestamp: String,
}

/// Attestation binding the run identity to the deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttestation {
    pub hash: String,
    pub signature: String,
    pub timestamp: String,
    pub attestation_type: String,
    pub run_id: u64,
    pub repository: String,
    pub workflow: String,
    pub commit_sha: String,
    pub workflow_ref: String,
}

/// Backend-witnessed provenance evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceAttestationEvidence {
    pub cosign_signature: String,
    pub attestation_id: String,
    pub sigstore_bundle: Value,
    pub timestamp: String,
    pub slsa_level: u8,
    pub attestation_hash: String,
    pub oidc_issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

/// Attestation quilt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationQuilt {
    pub quilt_type: QuiltType,
    pub quilt_version: String,
    pub domain: String,
    pub domain_verification: DomainVerificationEvidence,
    pub github_attestation: IdentityAttestation,
    pub provenance_attestation: ProvenanceAttestationEvidence,
    pub created_at: String,
    pub quilt_hash: String,
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SHA-256 over JCS of `quilt` with `quilt_hash` removed
pub fn compute_quilt_hash(quilt: &Value) -> Result<String, QuiltError> {
    let mut body = quilt.clone();
    match body.as_object_mut() {
        Some(map) => {
            map.remove("quilt_hash");
        }
        None => return Err(QuiltError::NotAnObject),
    }
    let jcs_bytes =
        serde_json_canonicalizer::to_vec(&body).map_err(|e| QuiltError::JcsError(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&jcs_bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute and compare the stored `quilt_hash`
pub fn verify_quilt_hash(quilt: &Value) -> Result<(), QuiltError> {
    let expected = quilt
        .get("quilt_hash")
        .and_then(Value::as_str)
        .ok_or_else(|| QuiltError::MissingField("quilt_hash".to_string()))?;
    let actual = compute_quilt_hash(quilt)?;
    if actual != expected {
        return Err(QuiltError::HashMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Check required fields, type/version tags, hash integrity and size
pub fn validate_quilt(quilt: &Value, max_size_bytes: usize) -> Result<QuiltType, QuiltError> {
    let object = quilt.as_object().ok_or(QuiltError::NotAnObject)?;
    for field in ["quilt_type", "quilt_version", "domain", "created_at", "quilt_hash"] {
        if object.get(field).map_or(true, Value::is_null) {
            return Err(QuiltError::MissingField(field.to_string()));
        }
    }

    let raw_type = object
        .get("quilt_type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let quilt_type =
        QuiltType::parse(raw_type).ok_or_else(|| QuiltError::UnknownType(raw_type.to_string()))?;

    let version = object
        .get("quilt_version")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if version != QUILT_VERSION {
        return Err(QuiltError::UnsupportedVersion(version.to_string()));
    }

    if object
        .get("domain")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty)
    {
        return Err(QuiltError::MissingField("domain".to_string()));
    }

    let required = match quilt_type {
        QuiltType::Manifest => MANIFEST_REQUIRED,
        QuiltType::Attestation => ATTESTATION_REQUIRED,
    };
    for path in required {
        if lookup(quilt, path).map_or(true, Value::is_null) {
            return Err(QuiltError::MissingField((*path).to_string()));
        }
    }

    let size = serde_json::to_vec(quilt)?.len();
    if size > max_size_bytes {
        return Err(QuiltError::TooLarge {
            size,
            max: max_size_bytes,
        });
    }

    verify_quilt_hash(quilt)?;

    if quilt_type == QuiltType::Manifest {
        let summary: FilesManifest = serde_json::from_value(quilt["files_manifest"].clone())?;
        check_manifest_summary(&summary)?;
    }

    Ok(quilt_type)
}

fn check_manifest_summary(summary: &FilesManifest) -> Result<(), QuiltError> {
    if summary.total_files != summary.files.len() {
        return Err(QuiltError::InconsistentManifest(format!(
            "total_files is {} but {} files are listed",
            summary.total_files,
            summary.files.len()
        )));
    }
    let size: u64 = summary.files.iter().map(|f| f.size_bytes).sum();
    if summary.total_size_bytes != size {
        return Err(QuiltError::InconsistentManifest(format!(
            "total_size_bytes is {} but files sum to {}",
            summary.total_size_bytes, size
        )));
    }
    let hash = FileManifest::compute_manifest_hash(&summary.files)
        .map_err(|e| QuiltError::JcsError(e.to_string()))?;
    if hash != summary.manifest_hash {
        return Err(QuiltError::InconsistentManifest(
            "manifest_hash does not match files".to_string(),
        ));
    }
    Ok(())
}

/// Validate the two quilts of one submission together
pub fn validate_submission(
    manifest: &ManifestQuilt,
    attestation: &AttestationQuilt,
    max_size_bytes: usize,
) -> Result<(), QuiltError> {
    manifest.validate(max_size_bytes)?;
    attestation.validate(max_size_bytes)?;
    if manifest.domain != attestation.domain {
        return Err(QuiltError::DomainMismatch {
            manifest: manifest.domain.clone(),
            attestation: attestation.domain.clone(),
        });
    }
    Ok(())
}

impl ManifestQuilt {
    /// Assemble and seal a manifest quilt stamped `created_at`
    pub fn assemble(
        domain: &str,
        manifest: &FileManifest,
        metadata: DeploymentMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<Self, QuiltError> {
        let manifest_hash = manifest
            .manifest_hash()
            .map_err(|e| QuiltError::JcsError(e.to_string()))?;
        let mut quilt = Self {
            quilt_type: QuiltType::Manifest,
            quilt_version: QUILT_VERSION.to_string(),
            domain: domain.to_string(),
            files_manifest: FilesManifest {
                files: manifest.files.clone(),
                total_files: manifest.total_files,
                total_size_bytes: manifest.total_size_bytes,
                manifest_hash,
                created_at: rfc3339(manifest.timestamp),
            },
            metadata,
            created_at: rfc3339(created_at),
            quilt_hash: String::new(),
        };
        quilt.quilt_hash = compute_quilt_hash(&serde_json::to_value(&quilt)?)?;
        Ok(quilt)
    }

    pub fn to_value(&self) -> Result<Value, QuiltError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn validate(&self, max_size_bytes: usize) -> Result<(), QuiltError> {
        validate_quilt(&self.to_value()?, max_size_bytes).map(|_| ())
    }
}

impl AttestationQuilt {
    /// Assemble and seal an attestation quilt stamped `created_at`
    pub fn assemble(
        domain: &str,
        domain_verification: DomainVerificationEvidence,
        github_attestation: IdentityAttestation,
        provenance_attestation: ProvenanceAttestationEvidence,
        created_at: DateTime<Utc>,
    ) -> Result<Self, QuiltError> {
        let mut quilt = Self {
            quilt_type: QuiltType::Attestation,
            quilt_version: QUILT_VERSION.to_string(),
            domain: domain.to_string(),
            domain_verification,
            github_attestation,
            provenance_attestation,
            created_at: rfc3339(created_at),
            quilt_hash: String::new(),
        };
        quilt.quilt_hash = compute_quilt_hash(&serde_json::to_value(&quilt)?)?;
        Ok(quilt)
    }

    pub fn to_value(&self) -> Result<Value, QuiltError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn validate(&self, max_size_bytes: usize) -> Result<(), QuiltError> {
        validate_quilt(&self.to_value()?, max_size_bytes).map(|_| ())
    }
}

/// Build a manifest quilt stamped now
pub fn build_manifest_quilt(
    domain: &str,
    manifest: &FileManifest,
    metadata: DeploymentMetadata,
) -> Result<ManifestQuilt, QuiltError> {
    ManifestQuilt::assemble(domain, manifest, metadata, Utc::now())
}

/// Build an attestation quilt stamped now
pub fn build_attestation_quilt(
    domain: &str,
    domain_verification: DomainVerificationEvidence,
    github_attestation: IdentityAttestation,
    provenance_attestation: ProvenanceAttestationEvidence,
) -> Result<AttestationQuilt, QuiltError> {
    AttestationQuilt::assemble(
        domain,
        domain_verification,
        github_attestation,
        provenance_attestation,
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::GenerationMethod;
    use chrono::TimeZone;
    use serde_json::json;

    fn manifest() -> FileManifest {
        let entry = FileEntry {
            path: "index.html".to_string(),
            content_hash: "a".repeat(64),
            size_bytes: 12,
            content_type: "text/html".to_string(),
            last_modified: 1_700_000_000_000,
            encoding: "utf-8".to_string(),
            blob_id: None,
        };
        FileManifest::new("example.com", vec![entry], GenerationMethod::Sequential, None, Vec::new())
    }

    fn metadata() -> DeploymentMetadata {
        DeploymentMetadata {
            build_timestamp: "2024-01-15T10:05:00Z".to_string(),
            github_repo: "acme/site".to_string(),
            commit_sha: "0".repeat(40),
            workflow_ref: "acme/site/.github/workflows/deploy.yml@refs/heads/main".to_string(),
            deployment_target: "testnet".to_string(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 6, 0).unwrap()
    }

    fn attestation_quilt() -> AttestationQuilt {
        AttestationQuilt::assemble(
            "example.com",
            DomainVerificationEvidence {
                domain_verification_hash: "d".repeat(64),
                domain_signature: "sig".to_string(),
                signature_timestamp: "2024-01-15T10:05:30Z".to_string(),
            },
            IdentityAttestation {
                hash: "h".to_string(),
                signature: "s".to_string(),
                timestamp: "2024-01-15T10:05:31Z".to_string(),
                attestation_type: "aws-nitro".to_string(),
                run_id: 42,
                repository: "acme/site".to_string(),
                workflow: "Deploy".to_string(),
                commit_sha: "0".repeat(40),
                workflow_ref: "refs/heads/main".to_string(),
            },
            ProvenanceAttestationEvidence {
                cosign_signature: "c".to_string(),
                attestation_id: "att-1".to_string(),
                sigstore_bundle: json!({"mediaType": "bundle"}),
                timestamp: "2024-01-15T10:05:32Z".to_string(),
                slsa_level: 3,
                attestation_hash: "e".repeat(64),
                oidc_issuer: "https://token.actions.githubusercontent.com".to_string(),
                certificate: None,
            },
            at(),
        )
        .unwrap()
    }

    #[test]
    fn test_manifest_quilt_hash_round_trip() {
        let quilt = ManifestQuilt::assemble("example.com", &manifest(), metadata(), at()).unwrap();
        let value = quilt.to_value().unwrap();
        assert_eq!(compute_quilt_hash(&value).unwrap(), quilt.quilt_hash);
        assert_eq!(validate_quilt(&value, DEFAULT_MAX_QUILT_SIZE).unwrap(), QuiltType::Manifest);
        assert_eq!(value["quilt_type"], "manifest");
        assert_eq!(value["quilt_version"], "1.0");
        assert_eq!(value["created_at"], "2024-01-15T10:06:00.000Z");
    }

    #[test]
    fn test_mutation_invalidates_hash() {
        let quilt = ManifestQuilt::assemble("example.com", &manifest(), metadata(), at()).unwrap();
        let mut value = quilt.to_value().unwrap();
        value["metadata"]["commit_sha"] = json!("f".repeat(40));
        assert!(matches!(
            verify_quilt_hash(&value),
            Err(QuiltError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_attestation_quilt_survives_reparse() {
        let quilt = attestation_quilt();
        let raw = serde_json::to_string_pretty(&quilt).unwrap();
        let reparsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(compute_quilt_hash(&reparsed).unwrap(), quilt.quilt_hash);
        assert_eq!(
            validate_quilt(&reparsed, DEFAULT_MAX_QUILT_SIZE).unwrap(),
            QuiltType::Attestation
        );
    }

    #[test]
    fn test_size_limit_is_hard_failure() {
        let quilt = ManifestQuilt::assemble("example.com", &manifest(), metadata(), at()).unwrap();
        assert!(matches!(quilt.validate(256), Err(QuiltError::TooLarge { max: 256, .. })));
    }

    #[test]
    fn test_missing_and_unknown_fields() {
        let mut value = attestation_quilt().to_value().unwrap();
        value["provenance_attestation"]
            .as_object_mut()
            .unwrap()
            .remove("attestation_id");
        assert!(matches!(
            validate_quilt(&value, DEFAULT_MAX_QUILT_SIZE),
            Err(QuiltError::MissingField(f)) if f == "provenance_attestation.attestation_id"
        ));

        let mut value = attestation_quilt().to_value().unwrap();
        value["quilt_type"] = json!("bundle");
        assert!(matches!(
            validate_quilt(&value, DEFAULT_MAX_QUILT_SIZE),
            Err(QuiltError::UnknownType(_))
        ));

        let mut value = attestation_quilt().to_value().unwrap();
        value["quilt_version"] = json!("2.0");
        assert!(matches!(
            validate_quilt(&value, DEFAULT_MAX_QUILT_SIZE),
            Err(QuiltError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_resealed_but_inconsistent_summary() {
        let mut value = ManifestQuilt::assemble("example.com", &manifest(), metadata(), at())
            .unwrap()
            .to_value()
            .unwrap();
        value["files_manifest"]["total_files"] = json!(2);
        value["quilt_hash"] = json!(compute_quilt_hash(&value).unwrap());
        assert!(matches!(
            validate_quilt(&value, DEFAULT_MAX_QUILT_SIZE),
            Err(QuiltError::InconsistentManifest(_))
        ));
    }

    #[test]
    fn test_submission_domains_must_match() {
        let manifest_quilt =
            ManifestQuilt::assemble("other.com", &manifest(), metadata(), at()).unwrap();
        assert!(matches!(
            validate_submission(&manifest_quilt, &attestation_quilt(), DEFAULT_MAX_QUILT_SIZE),
            Err(QuiltError::DomainMismatch { .. })
        ));
    }
}
