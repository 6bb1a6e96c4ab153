//! Effective configuration with source tracking
//!
//! The merged configuration plus the files that contributed to it, with
//! secrets redacted before it is ever printed.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::DeployConfig;
use super::merge::merge_layers;

/// Schema version for the effective config document
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "site-attest/effective_config@1";

/// Host config location under the user's config directory
pub const HOST_CONFIG_RELATIVE: &str = ".config/site-attest/config.toml";

/// Repo config file name
pub const REPO_CONFIG_FILE: &str = ".site-attest.toml";

const REDACTED: &str = "[REDACTED]";

/// Keys that contain secrets and are redacted
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "private_key",
    "signing_key",
    "api_key",
    "credential",
];

/// Where a layer came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Repo,
    Cli,
}

/// One contributing layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,
    /// Merged configuration, secrets redacted
    pub config: Value,
    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,
    /// Redacted key paths
    pub redactions: Vec<String>,
    /// Typed view of the unredacted merge
    #[serde(skip)]
    pub deploy: DeployConfig,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {message}")]
    Io { path: String, message: String },

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl EffectiveConfig {
    /// Merge the four layers; missing files are skipped
    pub fn build(
        host_config_path: Option<&Path>,
        repo_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![DeployConfig::defaults_value()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        for (origin, path) in [
            (ConfigOrigin::Host, host_config_path),
            (ConfigOrigin::Repo, repo_config_path),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let deploy: DeployConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        validate(&deploy)?;

        let mut config = merged;
        let redactions = redact_secrets(&mut config);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            redactions,
            deploy,
        })
    }

    /// Load host config from `home` and repo config from `repo_root`
    pub fn discover(
        home: Option<&Path>,
        repo_root: &Path,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let host = home.map(|h| h.join(HOST_CONFIG_RELATIVE));
        let repo = repo_root.join(REPO_CONFIG_FILE);
        Self::build(host.as_deref(), Some(&repo), cli_overrides)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Redacted value at a dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let display = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| ConfigError::Io {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
        path: display.clone(),
        message: format!("invalid UTF-8: {e}"),
    })?;
    let table: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: display,
        message: e.to_string(),
    })?;
    Ok((toml_to_json(table), digest))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn redact_secrets(value: &mut Value) -> Vec<String> {
    let mut redactions = Vec::new();
    redact_recursive(value, "", &mut redactions);
    redactions
}

fn redact_recursive(value: &mut Value, path: &str, redactions: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let current = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let key_lower = key.to_lowercase();
                let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));
                if is_secret && !val.is_object() && !val.is_array() && !val.is_null() {
                    *val = Value::String(REDACTED.to_string());
                    redactions.push(current);
                } else {
                    redact_recursive(val, &current, redactions);
                }
            }
        }
        Value::Array(items) => {
            for (i, val) in items.iter_mut().enumerate() {
                redact_recursive(val, &format!("{path}[{i}]"), redactions);
            }
        }
        _ => {}
    }
}

/// Bounds checks on the typed view
fn validate(config: &DeployConfig) -> Result<(), ConfigError> {
    let fail = |msg: String| Err(ConfigError::Validation(msg));

    if config.backend.api_version != attest_protocol::API_VERSION {
        return fail(format!(
            "backend.api_version must be {} (got {})",
            attest_protocol::API_VERSION,
            config.backend.api_version
        ));
    }
    let endpoint = config.backend.endpoint.as_str();
    if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
        return fail(format!("backend.endpoint must be an http(s) URL (got '{endpoint}')"));
    }
    if config.timeout_ms == 0 || config.timeout_ms > 600_000 {
        return fail("timeout_ms must be in (0, 600000]".to_string());
    }
    if config.retry.max_retries > 10 {
        return fail("retry.max_retries must be at most 10".to_string());
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return fail("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
    }
    if config.fingerprint.max_files == 0 {
        return fail("fingerprint.max_files must be positive".to_string());
    }
    if config.fingerprint.chunk_size == 0 {
        return fail("fingerprint.chunk_size must be positive".to_string());
    }
    if config.fingerprint.concurrency > 256 {
        return fail("fingerprint.concurrency must be at most 256".to_string());
    }
    if config.storage.epochs == 0 {
        return fail("storage.epochs must be positive".to_string());
    }
    if config.quilt.max_size_bytes == 0 || config.quilt.max_size_bytes > 100 * 1024 * 1024 {
        return fail("quilt.max_size_bytes must be in (0, 100 MiB]".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BackendKind, Network};
    use serde_json::json;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.get_u64("timeout_ms"), Some(30_000));
        assert_eq!(config.get_str("backend.kind"), Some("tee"));
        assert_eq!(config.deploy, DeployConfig::default());
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_layers_and_digests() {
        let mut host = NamedTempFile::new().unwrap();
        writeln!(host, "timeout_ms = 10000").unwrap();
        writeln!(host, "[storage]").unwrap();
        writeln!(host, "epochs = 12").unwrap();
        let mut repo = NamedTempFile::new().unwrap();
        writeln!(repo, "network = \"mainnet\"").unwrap();
        writeln!(repo, "[backend]").unwrap();
        writeln!(repo, "kind = \"oidc\"").unwrap();

        let cli = json!({"storage": {"epochs": 2}});
        let config = EffectiveConfig::build(Some(host.path()), Some(repo.path()), Some(cli)).unwrap();

        assert_eq!(config.deploy.timeout_ms, 10_000);
        assert_eq!(config.deploy.network, Network::Mainnet);
        assert_eq!(config.deploy.backend.kind, BackendKind::Oidc);
        assert_eq!(config.deploy.storage.epochs, 2);

        let origins: Vec<_> = config.sources.iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            vec![ConfigOrigin::Builtin, ConfigOrigin::Host, ConfigOrigin::Repo, ConfigOrigin::Cli]
        );
        let digest = config.sources[1].digest.as_deref().unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hex::encode(Sha256::digest(fs::read(host.path()).unwrap())));
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = EffectiveConfig::discover(Some(dir.path()), dir.path(), None).unwrap();
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_repo_file_discovered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(REPO_CONFIG_FILE), "deployment_target = \"staging\"\n").unwrap();
        let config = EffectiveConfig::discover(None, dir.path(), None).unwrap();
        assert_eq!(config.deploy.deployment_target, "staging");
        assert_eq!(config.sources[1].origin, ConfigOrigin::Repo);
    }

    #[test]
    fn test_bounds() {
        for (cli, needle) in [
            (json!({"timeout_ms": 0}), "timeout_ms"),
            (json!({"retry": {"max_retries": 50}}), "max_retries"),
            (json!({"retry": {"base_delay_ms": 60000}}), "base_delay_ms"),
            (json!({"fingerprint": {"chunk_size": 0}}), "chunk_size"),
            (json!({"storage": {"epochs": 0}}), "epochs"),
            (json!({"backend": {"endpoint": "ftp://nope"}}), "endpoint"),
            (json!({"backend": {"api_version": "v9"}}), "api_version"),
        ] {
            let err = EffectiveConfig::build(None, None, Some(cli)).unwrap_err();
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn test_unknown_enum_value_rejected() {
        let err = EffectiveConfig::build(None, None, Some(json!({"network": "devnet"}))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = = 3").unwrap();
        let err = EffectiveConfig::build(Some(file.path()), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_secret_redaction() {
        let cli = json!({
            "backend": {"api_token": "abc123"},
            "signing_key": "c2VjcmV0",
            "deployment_target": "visible"
        });
        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();
        assert_eq!(config.get_str("backend.api_token"), Some(REDACTED));
        assert_eq!(config.get_str("signing_key"), Some(REDACTED));
        assert_eq!(config.get_str("deployment_target"), Some("visible"));
        assert!(config.redactions.contains(&"backend.api_token".to_string()));
        assert!(!config.to_json().unwrap().contains("abc123"));
    }
}
