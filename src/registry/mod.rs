//! Atomic, versioned domain registry update
//!
//! An update runs through a fixed state machine:
//!
//! ```text
//! Idle -> ReadCurrentVersion -> ComposeUpdate -> SubmitAtomic -> Committed
//!                ^                                    |       -> RolledBack
//!                +------------ version conflict ------+       -> Failed
//! ```
//!
//! The update is composed against the version just read. When the store
//! reports that the version advanced in the meantime, the whole cycle
//! restarts from `ReadCurrentVersion`; the stale request is never resent.
//! Versions are decimal integers carried as strings, and the first write
//! to an unregistered domain is [`INITIAL_VERSION`].

use std::fmt;

use async_trait::async_trait;
use attest_protocol::ops::{DomainRecord, UpdateRegistryRequest, UpdateRegistryResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::client::{AttestError, AttestResult, ErrorKind};
use crate::retry::RetryPolicy;

/// Version written on first registration
pub const INITIAL_VERSION: &str = "1";

/// Registry read/write capability
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Current record for `domain`; `None` when never registered
    async fn read_record(&self, domain: &str) -> AttestResult<Option<DomainRecord>>;

    /// Submit one composed update.
    ///
    /// A stale `expected_version` must fail with
    /// [`ErrorKind::RegistryConflict`].
    async fn submit(&self, request: &UpdateRegistryRequest) -> AttestResult<UpdateRegistryResponse>;
}

/// States of one registry update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryState {
    Idle,
    ReadCurrentVersion,
    ComposeUpdate,
    SubmitAtomic,
    Committed,
    RolledBack,
    Failed,
}

impl RegistryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ReadCurrentVersion => "read_current_version",
            Self::ComposeUpdate => "compose_update",
            Self::SubmitAtomic => "submit_atomic",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A requested registry write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryUpdate {
    pub domain: String,
    pub site_data: serde_json::Value,
    pub signature: String,
    /// Require an all-or-nothing write guarded by the version read
    pub atomic: bool,
}

/// Committed registry write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryUpdateResult {
    pub success: bool,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    pub new_version: String,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    pub rolled_back: bool,
    /// Full read-compose-submit cycles repeated after a conflict
    pub retries: u32,
    pub trace: Vec<RegistryState>,
}

/// Version that follows `current`
pub fn next_version(current: Option<&str>) -> AttestResult<String> {
    match current {
        None => Ok(INITIAL_VERSION.to_string()),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_add(1))
            .map(|v| v.to_string())
            .ok_or_else(|| {
                AttestError::invalid_response(format!("registry version '{raw}' is not a counter"))
            }),
    }
}

/// Drives one [`RegistryUpdate`] through the state machine
pub struct AtomicRegistryUpdater<'a> {
    store: &'a dyn RegistryStore,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl<'a> AtomicRegistryUpdater<'a> {
    pub fn new(store: &'a dyn RegistryStore, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the update to a terminal state
    pub async fn run(&self, update: &RegistryUpdate) -> AttestResult<RegistryUpdateResult> {
        self.run_traced(update).await.0
    }

    /// Run the update and also return the visited states
    pub async fn run_traced(
        &self,
        update: &RegistryUpdate,
    ) -> (AttestResult<RegistryUpdateResult>, Vec<RegistryState>) {
        let mut trace = vec![RegistryState::Idle];
        let result = self.drive(update, &mut trace).await;
        (result, trace)
    }

    async fn drive(
        &self,
        update: &RegistryUpdate,
        trace: &mut Vec<RegistryState>,
    ) -> AttestResult<RegistryUpdateResult> {
        if update.domain.trim().is_empty() {
            trace.push(RegistryState::Failed);
            return Err(AttestError::validation("registry update requires a domain"));
        }

        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                trace.push(RegistryState::Failed);
                return Err(AttestError::cancelled("registry update").with_retries(attempt));
            }

            trace.push(RegistryState::ReadCurrentVersion);
            let current = match self.store.read_record(&update.domain).await {
                Ok(record) => record.and_then(|r| r.version),
                Err(err) => {
                    trace.push(RegistryState::Failed);
                    return Err(err.with_retries(attempt));
                }
            };

            trace.push(RegistryState::ComposeUpdate);
            let new_version = match next_version(current.as_deref()) {
                Ok(v) => v,
                Err(err) => {
                    trace.push(RegistryState::Failed);
                    return Err(err.with_retries(attempt));
                }
            };
            let request = UpdateRegistryRequest {
                domain: update.domain.clone(),
                site_data: update.site_data.clone(),
                signature: update.signature.clone(),
                atomic_transaction: update.atomic,
                expected_version: current.clone(),
                new_version: new_version.clone(),
            };
            debug!(
                domain = %update.domain,
                expected = current.as_deref().unwrap_or("none"),
                new_version = %new_version,
                atomic = update.atomic,
                "composed registry update"
            );

            trace.push(RegistryState::SubmitAtomic);
            let err = match self.store.submit(&request).await {
                Ok(response) => {
                    trace.push(RegistryState::Committed);
                    info!(
                        domain = %update.domain,
                        version = %response.new_version,
                        tx = %response.transaction_id,
                        retries = attempt,
                        "registry update committed"
                    );
                    return Ok(RegistryUpdateResult {
                        success: true,
                        domain: update.domain.clone(),
                        previous_version: current,
                        new_version: response.new_version,
                        transaction_id: response.transaction_id,
                        block_hash: response.block_hash,
                        rolled_back: false,
                        retries: attempt,
                        trace: trace.clone(),
                    });
                }
                Err(err) => err,
            };

            match err.kind {
                ErrorKind::RegistryConflict if attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        domain = %update.domain,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "registry version advanced, re-reading"
                    );
                    if !self.cancel.sleep(delay).await {
                        trace.push(RegistryState::Failed);
                        return Err(
                            AttestError::cancelled_after("registry update", &err).with_retries(attempt)
                        );
                    }
                    attempt += 1;
                }
                ErrorKind::RolledBack => {
                    trace.push(RegistryState::RolledBack);
                    warn!(domain = %update.domain, "registry write rolled back");
                    return Err(err.with_retries(attempt));
                }
                _ => {
                    trace.push(RegistryState::Failed);
                    return Err(err.with_retries(attempt));
                }
            }
        }
    }
}
