//! Ed25519 signing and SHA-256 hashing
//!
//! The deployer proves control of a domain by signing it with the key the
//! registry has on record. Backends verify the signature and pin the key
//! by its SHA-256 fingerprint.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::client::Signer;

/// Signature algorithm identifier
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Errors from signing/verification operations
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

/// Result type for signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Message signed to prove control of `domain`
pub fn domain_message(domain: &str) -> String {
    format!("site-attest:domain:{}", domain.trim().to_ascii_lowercase())
}

/// Hash identifying a domain verification request
pub fn domain_verification_hash(domain: &str) -> String {
    sha256_hex(domain_message(domain).as_bytes())
}

/// SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    sha256_hex(key.as_bytes())
}

fn key_bytes(encoded: &str) -> SigningResult<[u8; 32]> {
    let encoded = encoded.trim();
    let bytes = if encoded.len() == 64 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(encoded)?
    } else {
        STANDARD.decode(encoded)?
    };
    bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("key must be 32 bytes".to_string()))
}

/// Decode a verifying key from base64 or hex
pub fn decode_verifying_key(encoded: &str) -> SigningResult<VerifyingKey> {
    VerifyingKey::from_bytes(&key_bytes(encoded)?)
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

/// Verify a base64 signature over `message`
pub fn verify_signature(
    public_key: &str,
    message: &[u8],
    signature: &str,
) -> SigningResult<bool> {
    let verifying_key = decode_verifying_key(public_key)?;
    let sig_bytes = STANDARD.decode(signature)?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
    Ok(verifying_key.verify(message, &signature).is_ok())
}

/// Verify and check the key against a pinned fingerprint
pub fn verify_with_pinning(
    public_key: &str,
    message: &[u8],
    signature: &str,
    pinned_fingerprint: Option<&str>,
) -> SigningResult<bool> {
    if let Some(pinned) = pinned_fingerprint {
        let actual = compute_key_fingerprint(&decode_verifying_key(public_key)?);
        if actual != pinned {
            return Err(SigningError::FingerprintMismatch {
                expected: pinned.to_string(),
                actual,
            });
        }
    }
    verify_signature(public_key, message, signature)
}

/// Ed25519 signer holding the deployer's domain key
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Generate a fresh keypair
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Load a 32-byte secret given as hex or base64
    pub fn from_secret(encoded: &str) -> SigningResult<Self> {
        Ok(Self::new(SigningKey::from_bytes(&key_bytes(encoded)?)))
    }

    /// Secret as base64, for storage
    pub fn secret_base64(&self) -> String {
        STANDARD.encode(self.key.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Signature over the domain ownership message
    pub fn sign_domain(&self, domain: &str) -> String {
        self.sign_bytes(domain_message(domain).as_bytes())
    }

    fn sign_bytes(&self, message: &[u8]) -> String {
        STANDARD.encode(self.key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("fingerprint", &compute_key_fingerprint(&self.verifying_key()))
            .finish_non_exhaustive()
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> String {
        STANDARD.encode(self.verifying_key().as_bytes())
    }

    fn fingerprint(&self) -> String {
        compute_key_fingerprint(&self.verifying_key())
    }

    fn sign(&self, message: &[u8]) -> String {
        self.sign_bytes(message)
    }
}
