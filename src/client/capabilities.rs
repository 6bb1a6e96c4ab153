//! Opaque capabilities consumed by the clients
//!
//! Key material, identity tokens and blob storage are supplied from
//! outside. The registry write path has its own seam in
//! [`RegistryStore`](crate::registry::RegistryStore).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use attest_protocol::ops::UploadBlobRequest;
use chrono::{DateTime, Utc};

use super::error::AttestResult;

/// Sign/verify capability holding the deployer's domain key
pub trait Signer: Send + Sync {
    /// Base64 public key
    fn public_key(&self) -> String;

    /// SHA-256 fingerprint of the public key
    fn fingerprint(&self) -> String;

    /// Base64 signature over `message`
    fn sign(&self, message: &[u8]) -> String;
}

/// Short-lived identity token issued by the platform
#[derive(Clone)]
pub struct IdentityToken {
    pub token: String,
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("token", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of OIDC identity tokens
#[async_trait]
pub trait IdentityTokenSource: Send + Sync {
    /// Request a token scoped to `audience`
    async fn fetch_token(&self, audience: &str) -> AttestResult<IdentityToken>;
}

/// Token source returning a token obtained out of band
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
    issuer: String,
    lifetime: Duration,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issuer: issuer.into(),
            lifetime: Duration::from_secs(300),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenSource")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityTokenSource for StaticTokenSource {
    async fn fetch_token(&self, _audience: &str) -> AttestResult<IdentityToken> {
        let lifetime = chrono::Duration::from_std(self.lifetime)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Ok(IdentityToken {
            token: self.token.clone(),
            issuer: self.issuer.clone(),
            expires_at: Utc::now() + lifetime,
        })
    }
}

/// Blob storage upload capability
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store one blob and return its identifier
    async fn put_blob(&self, request: &UploadBlobRequest) -> AttestResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_source() {
        let source = StaticTokenSource::new("jwt", "https://issuer.example")
            .with_lifetime(Duration::from_secs(60));
        let token = source.fetch_token("site-attest").await.unwrap();
        assert_eq!(token.token, "jwt");
        assert!(token.expires_at > Utc::now());
        assert!(!format!("{:?}", token).contains("jwt"));
    }
}
