//! site-attest - attested static site deployments
//!
//! Fingerprints a build tree, binds it to SLSA provenance, has an
//! attestation backend (hardware enclave or GitHub OIDC) witness it, and
//! records the result in a versioned domain registry with optimistic
//! concurrency.

pub mod cancel;
pub mod client;
pub mod config;
pub mod fingerprint;
pub mod mock;
pub mod pipeline;
pub mod provenance;
pub mod quilt;
pub mod registry;
pub mod retry;
pub mod server;
pub mod signing;

pub use cancel::CancelToken;
pub use client::{AttestError, AttestResult, AttestationBackend, ErrorKind, OidcClient, TeeClient};
pub use config::{DeployConfig, EffectiveConfig};
pub use fingerprint::{FileEntry, FileManifest, FingerprintConfig, FingerprintEngine, ManifestError};
pub use pipeline::{DeploymentFailure, DeploymentPipeline, DeploymentResult, PipelineOptions, Stage};
pub use provenance::{BuildContext, ProvenanceValidator, ValidationOptions, ValidationResult};
pub use quilt::{AttestationQuilt, ManifestQuilt, QuiltError};
pub use registry::{AtomicRegistryUpdater, RegistryState, RegistryUpdate, RegistryUpdateResult};
pub use retry::{Attempted, RetryPolicy};
pub use server::DeploymentClient;
