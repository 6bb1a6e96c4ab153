//! Mock attestation backend
//!
//! In-process implementation of the backend protocol for tests and local
//! dry runs. Plugs in wherever a [`Transport`](crate::client::Transport)
//! is accepted.
//!
//! # Operations
//!
//! - `authenticate` / `end_session`: Ed25519 challenge or OIDC token sessions
//! - `verify_domain`: checks the domain signature against a registered key
//! - `attest_provenance`: witnesses the canonical provenance digest
//! - `upload_blob` / `store_provenance`: content-addressed blob storage
//! - `get_domain_record` / `update_registry`: versioned registry with
//!   optimistic concurrency and idempotent replay
//! - `submit_deployment` / `deployment_status`: server-mediated flow

mod backend;
mod failure;
mod state;

pub use backend::{MockBackend, MockConfig};
pub use failure::{FailureConfig, FailureInjector};
pub use state::{CallRecord, MockState, RegistryEntry, SessionOrigin};
