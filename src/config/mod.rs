//! Layered configuration
//!
//! Four layers, later ones winning:
//! 1. Built-in defaults
//! 2. Host config (`~/.config/site-attest/config.toml`)
//! 3. Repo config (`.site-attest.toml`)
//! 4. CLI overrides

mod defaults;
mod effective;
mod merge;

pub use defaults::{
    BackendSettings, DeployConfig, ProvenanceSettings, QuiltSettings, StorageSettings,
    DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_MS,
};
pub use effective::{
    ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, HOST_CONFIG_RELATIVE,
    REPO_CONFIG_FILE, SCHEMA_ID, SCHEMA_VERSION,
};
pub use merge::{deep_merge, merge_layers};
