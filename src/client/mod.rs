//! Attestation backend clients
//!
//! Two variants implement [`AttestationBackend`]:
//! - [`TeeClient`]: hardware trusted-execution service, Ed25519 challenge auth
//! - [`OidcClient`]: platform identity token, transparency-log signatures
//!
//! Both route every call through one [`BackendChannel`]: shared retry
//! policy, per-operation idempotency keys and a single-writer session cache.

pub mod backend;
pub mod capabilities;
pub mod channel;
pub mod error;
pub mod oidc;
pub mod session;
pub mod tee;
pub mod transport;
pub mod types;

pub use backend::AttestationBackend;
pub use capabilities::{BlobStore, IdentityToken, IdentityTokenSource, Signer, StaticTokenSource};
pub use channel::BackendChannel;
pub use error::{codes, AttestError, AttestResult, ErrorKind};
pub use oidc::{OidcClient, OidcConfig, GITHUB_OIDC_ISSUER};
pub use session::{Session, SessionCache, SessionInfo};
pub use tee::{TeeClient, TeeConfig};
pub use transport::{HttpConfig, HttpTransport, Transport, TransportError};
pub use types::{
    AttestationEvidence, BackendKind, DomainVerification, HealthStatus, Network, StorageConfig,
    UploadFailure, UploadResult,
};
