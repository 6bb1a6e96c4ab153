//! Domain registry types.

use serde::{Deserialize, Serialize};

/// On-record state of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    /// Current version (decimal string); absent before first registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Get-domain-record request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDomainRecordRequest {
    pub domain: String,
}

/// Update-registry request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRegistryRequest {
    pub domain: String,
    pub site_data: serde_json::Value,
    pub signature: String,
    pub atomic_transaction: bool,
    /// Version the update was composed against; `None` for first registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<String>,
    pub new_version: String,
}

/// Update-registry response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRegistryResponse {
    pub new_version: String,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
}
