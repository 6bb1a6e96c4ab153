//! Authentication operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the client proves its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Ed25519 signature over `challenge`.
    Ed25519Challenge {
        /// Base64-encoded public key.
        public_key: String,
        /// Signed message (`<key fingerprint>:<RFC 3339 timestamp>`).
        challenge: String,
        /// Base64-encoded signature.
        signature: String,
    },
    /// Short-lived identity token from the platform OIDC issuer.
    OidcToken {
        /// The raw JWT.
        id_token: String,
        /// Issuer URL.
        issuer: String,
    },
}

/// Authenticate request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    #[serde(flatten)]
    pub method: AuthMethod,
    /// Region or deployment zone requested by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Authenticate response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    /// Opaque bearer token.
    pub session_token: String,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}
