//! Attestation backend protocol types
//!
//! Defines the JSON request/response envelope spoken between the
//! deployment client and an attestation backend, the stable error code
//! registry, and the per-operation payloads.

pub mod error;
pub mod ops;
pub mod request;
pub mod response;

pub use error::{ErrorCode, RemoteError};
pub use ops::Operation;
pub use request::BackendRequest;
pub use response::BackendResponse;

/// API version segment used in backend endpoint paths.
pub const API_VERSION: &str = "v1";

/// Version reported in client metadata.
pub const CLIENT_VERSION: &str = "0.1.0";
