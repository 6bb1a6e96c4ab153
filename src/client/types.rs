//! Client-facing result types shared by every backend variant

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which backend variant produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hardware trusted-execution service
    Tee,
    /// GitHub OIDC with transparency-log signatures
    Oidc,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tee => "tee",
            BackendKind::Oidc => "oidc",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage and registry network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network '{other}' (expected mainnet or testnet)")),
        }
    }
}

/// Outcome of a domain ownership check.
///
/// Transient failures that exhaust the retry budget come back here with
/// `verified: false`, `retry_count` and `error` set rather than as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerification {
    pub domain: String,
    pub verified: bool,
    #[serde(default)]
    pub attestation_hash: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_document: Option<String>,
    #[serde(default)]
    pub attestation_type: String,
    #[serde(default)]
    pub timestamp: String,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evidence returned by a backend after attesting provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationEvidence {
    pub backend: BackendKind,
    pub attestation_id: String,
    pub signature: String,
    pub attestation_hash: String,
    /// SHA-256 of the canonical provenance the backend attested
    pub provenance_sha256: String,
    pub timestamp: String,
    pub slsa_level: u8,
    /// Hardware attestation document or transparency-log bundle
    pub bundle: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_issuer: Option<String>,
    pub retries: u32,
}

/// Upload parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub network: Network,
    /// Storage epochs to pay for
    pub epochs: u32,
    /// Per-file failures tolerated before the batch aborts
    pub failure_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            epochs: 5,
            failure_threshold: 0,
        }
    }
}

/// One file that could not be uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of uploading a manifest's artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Manifest path to blob identifier
    pub blob_mapping: BTreeMap<String, String>,
    /// Files skipped under the failure threshold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<UploadFailure>,
    pub total_blobs: usize,
    pub total_size_bytes: u64,
    pub duration_ms: u64,
    pub epochs: u32,
    pub retries: u32,
}

/// Backend liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert!("devnet".parse::<Network>().is_err());
        assert_eq!(Network::default(), Network::Testnet);
    }

    #[test]
    fn test_backend_kind_wire_name() {
        assert_eq!(serde_json::to_string(&BackendKind::Oidc).unwrap(), "\"oidc\"");
        assert_eq!(BackendKind::Tee.to_string(), "tee");
    }
}
