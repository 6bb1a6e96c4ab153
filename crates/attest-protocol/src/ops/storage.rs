//! Blob storage types.

use serde::{Deserialize, Serialize};

/// Upload-blob request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBlobRequest {
    /// Manifest-relative path of the artifact.
    pub path: String,
    pub content_sha256: String,
    pub size_bytes: u64,
    pub content_type: String,
    /// Storage network (`mainnet` or `testnet`).
    pub network: String,
    /// Number of storage epochs to pay for.
    pub epochs: u32,
    /// Base64-encoded file content.
    pub content_base64: String,
}

/// Upload-blob response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBlobResponse {
    pub blob_id: String,
}

/// Store-provenance request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProvenanceRequest {
    pub attestation_id: String,
    pub attestation_hash: String,
    pub signature: String,
    /// The attested provenance document plus evidence.
    pub document: serde_json::Value,
}

/// Store-provenance response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProvenanceResponse {
    pub blob_id: String,
}
