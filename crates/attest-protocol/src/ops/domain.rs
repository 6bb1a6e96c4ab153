//! Domain ownership verification types.

use serde::{Deserialize, Serialize};

/// Verify-domain request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDomainRequest {
    pub domain: String,
    /// Base64 signature over the domain by the registered key.
    pub signature: String,
    /// Hash registered for the domain when it was first claimed.
    pub domain_verification_hash: String,
}

/// Verify-domain response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDomainResponse {
    pub verified: bool,
    /// Hash of the verification statement.
    pub attestation_hash: String,
    /// Backend signature over `attestation_hash`.
    pub signature: String,
    /// Raw hardware attestation document, if the backend produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_document: Option<String>,
    pub timestamp: String,
    /// Backend-specific label (`aws-nitro`, `github-oidc`, ...).
    pub attestation_type: String,
}
