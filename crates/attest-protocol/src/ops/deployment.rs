//! Server-mediated deployment submission and status polling.
//!
//! A deployment carries both quilts in one request; the server performs
//! verification, storage and the registry write, and reports each step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata identifying the submitting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub user_agent: String,
    pub run_id: String,
    pub repository: String,
    pub action_version: String,
}

/// Deployment submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub domain: String,
    /// Manifest quilt as JSON.
    pub manifest_quilt: serde_json::Value,
    /// Attestation quilt as JSON.
    pub attestation_quilt: serde_json::Value,
    /// Target network (`mainnet` or `testnet`).
    pub network: String,
    pub client_info: ClientInfo,
    #[serde(default)]
    pub deployment_target: String,
}

/// Storage upload summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSummary {
    /// Manifest path to blob identifier.
    pub blob_mapping: BTreeMap<String, String>,
    pub total_blobs: usize,
    pub total_size_bytes: u64,
    pub upload_duration_ms: u64,
    pub storage_epochs: u32,
}

/// Provenance storage summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceStorageSummary {
    pub blob_id: String,
    #[serde(default)]
    pub storage_timestamp: String,
}

/// Registry update summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub success: bool,
    pub new_version: String,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
}

/// Evidence from the backend that performed the deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAttestationSummary {
    pub measurement_hash: String,
    pub attestation_signature: String,
    #[serde(default)]
    pub timestamp: String,
    pub certificate: String,
}

/// Deployment submission response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub success: bool,
    /// Server-assigned request identifier.
    pub request_id: String,
    #[serde(default)]
    pub domain_verified: bool,
    #[serde(default)]
    pub verification_timestamp: String,
    #[serde(default)]
    pub storage: StorageSummary,
    #[serde(default)]
    pub provenance_storage: ProvenanceStorageSummary,
    #[serde(default)]
    pub registry_update: RegistrySummary,
    #[serde(default)]
    pub backend_attestation: BackendAttestationSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Seconds to wait before resubmitting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Lifecycle state of an asynchronous deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DeploymentStatus {
    /// Terminal states end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status poll request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub request_id: String,
}

/// Status poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub request_id: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub progress_percentage: u8,
    #[serde(default)]
    pub current_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DeploymentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::Processing.is_terminal());
        assert!(DeploymentStatus::Completed.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_response_parses_minimal() {
        let resp: StatusResponse = serde_json::from_value(serde_json::json!({
            "request_id": "dep-1",
            "status": "processing",
            "progress_percentage": 40,
            "current_step": "storage_upload"
        }))
        .unwrap();
        assert_eq!(resp.status, DeploymentStatus::Processing);
        assert!(resp.result.is_none());
    }
}
