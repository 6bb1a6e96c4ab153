//! Typed deployment configuration and its built-in defaults (layer 1)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{BackendKind, HttpConfig, Network, OidcConfig, StorageConfig, TeeConfig, GITHUB_OIDC_ISSUER};
use crate::fingerprint::FingerprintConfig;
use crate::pipeline::PipelineOptions;
use crate::provenance::{ProvenanceFormat, ValidationOptions};
use crate::quilt::DEFAULT_MAX_QUILT_SIZE;
use crate::retry::{RetryPolicy, RetrySettings};

/// Default backend endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787";

/// Default per-call timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Which backend to talk to and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub endpoint: String,
    /// Requested enclave region (TEE only)
    pub region: Option<String>,
    pub api_version: String,
    /// Attestation label the enclave is expected to report (TEE only)
    pub attestation_type: String,
    /// Token audience (OIDC only)
    pub audience: String,
    /// Issuer the identity token must come from (OIDC only)
    pub expected_issuer: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Tee,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            region: None,
            api_version: attest_protocol::API_VERSION.to_string(),
            attestation_type: "aws-nitro".to_string(),
            audience: "site-attest".to_string(),
            expected_issuer: GITHUB_OIDC_ISSUER.to_string(),
        }
    }
}

/// Artifact upload tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub epochs: u32,
    pub failure_threshold: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let storage = StorageConfig::default();
        Self {
            epochs: storage.epochs,
            failure_threshold: storage.failure_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiltSettings {
    pub max_size_bytes: usize,
}

impl Default for QuiltSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_QUILT_SIZE,
        }
    }
}

/// Provenance shape and validation strictness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceSettings {
    pub format: ProvenanceFormat,
    pub strict_mode: bool,
    pub allow_deprecated: bool,
    pub validate_timestamps: bool,
    pub require_optional_fields: Vec<String>,
}

impl Default for ProvenanceSettings {
    fn default() -> Self {
        let validation = ValidationOptions::default();
        Self {
            format: ProvenanceFormat::V11,
            strict_mode: validation.strict_mode,
            allow_deprecated: validation.allow_deprecated,
            validate_timestamps: validation.validate_timestamps,
            require_optional_fields: validation.require_optional_fields,
        }
    }
}

impl ProvenanceSettings {
    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            strict_mode: self.strict_mode,
            allow_deprecated: self.allow_deprecated,
            validate_timestamps: self.validate_timestamps,
            require_optional_fields: self.require_optional_fields.clone(),
        }
    }
}

/// Complete deployment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub backend: BackendSettings,
    pub network: Network,
    pub fingerprint: FingerprintConfig,
    pub provenance: ProvenanceSettings,
    pub retry: RetrySettings,
    /// Per-call timeout
    pub timeout_ms: u64,
    pub storage: StorageSettings,
    pub quilt: QuiltSettings,
    /// Free-form label recorded in the manifest quilt
    pub deployment_target: String,
    /// Guard registry writes with the version read
    pub atomic_registry: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            network: Network::Testnet,
            fingerprint: FingerprintConfig::default(),
            provenance: ProvenanceSettings::default(),
            retry: RetrySettings::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            storage: StorageSettings::default(),
            quilt: QuiltSettings::default(),
            deployment_target: "production".to_string(),
            atomic_registry: true,
        }
    }
}

impl DeployConfig {
    /// Built-in defaults as a merge layer
    pub fn defaults_value() -> Result<Value, serde_json::Error> {
        serde_json::to_value(Self::default())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_settings(&self.retry, self.timeout())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            network: self.network,
            epochs: self.storage.epochs,
            failure_threshold: self.storage.failure_threshold,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: self.timeout(),
            ..HttpConfig::new(self.backend.endpoint.clone())
        }
    }

    pub fn tee_config(&self) -> TeeConfig {
        TeeConfig {
            region: self.backend.region.clone(),
            attestation_type: self.backend.attestation_type.clone(),
            validation: self.provenance.validation_options(),
        }
    }

    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            audience: self.backend.audience.clone(),
            expected_issuer: self.backend.expected_issuer.clone(),
            validation: self.provenance.validation_options(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            fingerprint: self.fingerprint.clone(),
            provenance_format: self.provenance.format,
            validation: self.provenance.validation_options(),
            storage: self.storage_config(),
            max_quilt_size: self.quilt.max_size_bytes,
            deployment_target: self.deployment_target.clone(),
            atomic_registry: self.atomic_registry,
        }
    }
}
