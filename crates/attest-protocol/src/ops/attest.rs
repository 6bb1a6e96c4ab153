//! Provenance attestation types.

use serde::{Deserialize, Serialize};

/// Build facts forwarded alongside the provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestContext {
    pub actor: String,
    pub workflow: String,
    pub repository: String,
    pub run_id: u64,
}

/// Attest-provenance request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestProvenanceRequest {
    /// The provenance document as JSON.
    pub provenance: serde_json::Value,
    /// SHA-256 of the canonical provenance serialization.
    pub provenance_sha256: String,
    /// SHA-256 binding the manifest file list.
    pub manifest_hash: String,
    pub subject_count: usize,
    pub context: AttestContext,
}

/// Attest-provenance response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestProvenanceResponse {
    pub attestation_id: String,
    /// Backend signature over the provenance hash.
    pub signature: String,
    pub attestation_hash: String,
    pub timestamp: String,
    pub slsa_level: u8,
    /// Backend-specific evidence (hardware document or transparency-log bundle).
    #[serde(default)]
    pub bundle: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_issuer: Option<String>,
}
