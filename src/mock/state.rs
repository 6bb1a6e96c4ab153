//! Mock backend state
//!
//! Sessions, registered domain keys, the versioned registry, stored blobs
//! and submitted deployments.

use std::collections::{BTreeMap, HashMap};

use attest_protocol::ops::{DeploymentResponse, DeploymentStatus};
use attest_protocol::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a session was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Ed25519,
    Oidc,
}

/// An issued session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockSession {
    pub origin: SessionOrigin,
    pub expires_at: DateTime<Utc>,
}

/// A registry record with its history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub version: u64,
    pub site_data: serde_json::Value,
    pub last_updated: DateTime<Utc>,
    pub transactions: Vec<String>,
}

/// A submitted server-mediated deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDeployment {
    pub response: DeploymentResponse,
    /// Status polls answered so far
    pub polls: u32,
    pub status: DeploymentStatus,
}

/// One received request, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: Operation,
    pub request_id: String,
    pub idempotency_key: String,
}

/// Complete mock backend state
#[derive(Debug, Default)]
pub struct MockState {
    pub sessions: HashMap<String, MockSession>,
    /// Domain to base64 public key
    pub domain_keys: HashMap<String, String>,
    pub registry: BTreeMap<String, RegistryEntry>,
    pub blobs: BTreeMap<String, Vec<u8>>,
    pub provenance: BTreeMap<String, serde_json::Value>,
    pub deployments: HashMap<String, MockDeployment>,
    /// Idempotency key to transaction id, for replayed registry writes
    pub applied_updates: HashMap<String, String>,
    /// Concurrent writes to simulate before the next N registry submits
    pub pending_races: HashMap<String, u32>,
    pub calls: Vec<CallRecord>,
}

impl MockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of `domain`, if registered
    pub fn version_of(&self, domain: &str) -> Option<u64> {
        self.registry.get(domain).map(|e| e.version)
    }

    /// Apply a write, bumping the version to `version`
    pub fn commit(&mut self, domain: &str, version: u64, site_data: serde_json::Value, tx: &str) {
        let entry = self
            .registry
            .entry(domain.to_string())
            .or_insert_with(|| RegistryEntry {
                version: 0,
                site_data: serde_json::Value::Null,
                last_updated: Utc::now(),
                transactions: Vec::new(),
            });
        entry.version = version;
        entry.site_data = site_data;
        entry.last_updated = Utc::now();
        entry.transactions.push(tx.to_string());
    }

    /// Calls received for `op`
    pub fn calls_for(&self, op: Operation) -> Vec<&CallRecord> {
        self.calls.iter().filter(|c| c.op == op).collect()
    }
}
