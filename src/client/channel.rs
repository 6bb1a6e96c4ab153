//! Request plumbing shared by the backend variants
//!
//! A [`BackendChannel`] owns the transport, the retry policy, the
//! cancellation token and the session cache of one client instance. Every
//! logical operation gets one ULID idempotency key that is reused across its
//! retries; each attempt gets a fresh request id.
//!
//! Calls observe a per-connection child of the caller's cancellation token.
//! `disconnect` fires only that child and arms a fresh one, so the client
//! can authenticate again and the caller's token is never tripped.

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use attest_protocol::ops::{
    AttestContext, AttestProvenanceRequest, AttestProvenanceResponse, AuthenticateRequest,
    AuthenticateResponse, DomainRecord, GetDomainRecordRequest, HealthResponse,
    StoreProvenanceRequest, StoreProvenanceResponse, UpdateRegistryRequest,
    UpdateRegistryResponse, UploadBlobRequest, UploadBlobResponse, VerifyDomainRequest,
    VerifyDomainResponse,
};
use attest_protocol::{BackendRequest, ErrorCode, Operation};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::fingerprint::{FileEntry, FileManifest};
use crate::provenance::{BuildContext, ProvenanceValidator, ValidationOptions};
use crate::registry::{AtomicRegistryUpdater, RegistryStore, RegistryUpdate, RegistryUpdateResult};
use crate::retry::{Attempted, RetryPolicy};
use crate::signing::{domain_verification_hash, sha256_hex};

use super::capabilities::BlobStore;
use super::error::{codes, AttestError, AttestResult, ErrorKind};
use super::session::{Session, SessionCache, SessionInfo};
use super::transport::Transport;
use super::types::{
    AttestationEvidence, DomainVerification, HealthStatus, StorageConfig, UploadFailure,
    UploadResult,
};

/// Shared request plumbing for one client instance
pub struct BackendChannel {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    cancel: CancelToken,
    connection: Mutex<CancelToken>,
    session: SessionCache,
    blob_store: Option<Arc<dyn BlobStore>>,
    registry: Option<Arc<dyn RegistryStore>>,
}

impl BackendChannel {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let cancel = CancelToken::new();
        Self {
            transport,
            policy,
            connection: Mutex::new(cancel.child()),
            cancel,
            session: SessionCache::default(),
            blob_store: None,
            registry: None,
        }
    }

    pub fn set_cancel(&mut self, cancel: CancelToken) {
        *self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = cancel.child();
        self.cancel = cancel;
    }

    pub fn set_blob_store(&mut self, store: Arc<dyn BlobStore>) {
        self.blob_store = Some(store);
    }

    pub fn set_registry_store(&mut self, store: Arc<dyn RegistryStore>) {
        self.registry = Some(store);
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Token observed by calls on the current connection
    pub fn cancel_token(&self) -> CancelToken {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send one attempt of `op`
    async fn send_once<R: DeserializeOwned>(
        &self,
        op: Operation,
        idempotency_key: &str,
        payload: &Value,
        session: Option<&str>,
    ) -> AttestResult<R> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut request = BackendRequest::new(op, request_id, idempotency_key, payload.clone());
        if let Some(token) = session {
            request = request.with_session(token);
        }

        let response = self.transport.execute(&request).await?;
        if !response.ok {
            return Err(match &response.error {
                Some(remote) => AttestError::from_remote(remote, response.status),
                None => AttestError::server(
                    response.status,
                    format!("{op} failed without an error payload"),
                    response.status >= 500,
                ),
            });
        }
        response
            .decode()
            .map_err(|e| AttestError::invalid_response(format!("{op}: {e}")))
    }

    async fn call_inner<Req, R, F>(
        &self,
        op: Operation,
        payload: &Req,
        retry_conflicts: bool,
        check: F,
    ) -> AttestResult<Attempted<R>>
    where
        Req: Serialize + ?Sized,
        R: DeserializeOwned,
        F: Fn(R) -> AttestResult<R>,
    {
        let payload = serde_json::to_value(payload)
            .map_err(|e| AttestError::validation(format!("{op}: unserializable request: {e}")))?;
        let session = if op.requires_session() {
            Some(self.session.token().await.ok_or_else(|| {
                AttestError::authentication(format!("{op} requires an authenticated session"))
            })?)
        } else {
            None
        };
        let key = ulid::Ulid::new().to_string();
        debug!(%op, idempotency_key = %key, "calling backend");

        let cancel = self.cancel_token();
        let (key, payload, session, check) = (key.as_str(), &payload, session.as_deref(), &check);
        let result = self
            .policy
            .run(op.as_str(), &cancel, |_| async move {
                match self.send_once(op, key, payload, session).await.and_then(check) {
                    Err(err) if !retry_conflicts && err.is(ErrorKind::RegistryConflict) => {
                        Err(err.retryable(false))
                    }
                    other => other,
                }
            })
            .await;

        result.map_err(|err| {
            if err.is(ErrorKind::RegistryConflict) {
                err.retryable(true)
            } else {
                err
            }
        })
    }

    /// Call `op` under the retry policy
    pub async fn call<Req, R>(&self, op: Operation, payload: &Req) -> AttestResult<Attempted<R>>
    where
        Req: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call_inner(op, payload, true, Ok).await
    }

    /// Call `op`, passing each decoded response through `check`.
    ///
    /// A `check` failure counts as a failed attempt and is retried when
    /// flagged retryable.
    pub async fn call_checked<Req, R, F>(
        &self,
        op: Operation,
        payload: &Req,
        check: F,
    ) -> AttestResult<Attempted<R>>
    where
        Req: Serialize + ?Sized,
        R: DeserializeOwned,
        F: Fn(R) -> AttestResult<R>,
    {
        self.call_inner(op, payload, true, check).await
    }

    /// Establish a session unless a fresh one is cached
    pub async fn authenticate(&self, request: AuthenticateRequest) -> AttestResult<SessionInfo> {
        self.session
            .get_or_refresh(|| async {
                let response: Attempted<AuthenticateResponse> =
                    self.call(Operation::Authenticate, &request).await?;
                Ok(Session {
                    token: response.value.session_token,
                    expires_at: response.value.expires_at,
                })
            })
            .await
    }

    /// The fresh cached session, if any
    pub async fn cached_session(&self) -> Option<SessionInfo> {
        self.session.fresh().await.map(|s| SessionInfo {
            expires_at: s.expires_at,
            reused: true,
        })
    }

    pub async fn verify_domain(
        &self,
        domain: &str,
        signature: &str,
    ) -> AttestResult<DomainVerification> {
        let request = VerifyDomainRequest {
            domain: domain.to_string(),
            signature: signature.to_string(),
            domain_verification_hash: domain_verification_hash(domain),
        };
        match self
            .call::<_, VerifyDomainResponse>(Operation::VerifyDomain, &request)
            .await
        {
            Ok(Attempted { value, retries }) => Ok(DomainVerification {
                domain: domain.to_string(),
                verified: value.verified,
                attestation_hash: value.attestation_hash,
                signature: value.signature,
                attestation_document: value.attestation_document,
                attestation_type: value.attestation_type,
                timestamp: value.timestamp,
                retry_count: retries,
                error: None,
            }),
            Err(err) if err.retryable => {
                warn!(domain, retries = err.retries, error = %err, "domain verification unavailable");
                Ok(DomainVerification {
                    domain: domain.to_string(),
                    verified: false,
                    retry_count: err.retries,
                    error: Some(err.to_string()),
                    ..DomainVerification::default()
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Gate the provenance locally, then ask the backend to attest it.
    ///
    /// Returns the raw response and the canonical provenance digest.
    pub async fn attest(
        &self,
        provenance: &Value,
        manifest: &FileManifest,
        context: &BuildContext,
        validation: &ValidationOptions,
    ) -> AttestResult<(Attempted<AttestProvenanceResponse>, String)> {
        let report =
            ProvenanceValidator::new(validation.clone()).validate_against_manifest(provenance, manifest);
        if !report.is_valid {
            return Err(AttestError::validation(format!(
                "provenance rejected (severity {}): {}",
                report.severity,
                report.errors.join("; ")
            )));
        }

        let canonical = serde_json_canonicalizer::to_vec(provenance)
            .map_err(|e| AttestError::validation(format!("provenance not canonicalizable: {e}")))?;
        let provenance_sha256 = sha256_hex(&canonical);
        let manifest_hash = manifest
            .manifest_hash()
            .map_err(|e| AttestError::manifest(e.to_string()))?;

        let subject_count = provenance
            .get("subject")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let request = AttestProvenanceRequest {
            provenance: provenance.clone(),
            provenance_sha256: provenance_sha256.clone(),
            manifest_hash,
            subject_count,
            context: AttestContext {
                actor: context.actor.clone(),
                workflow: context.workflow.clone(),
                repository: context.repository.clone(),
                run_id: context.run_id,
            },
        };
        let response = self.call(Operation::AttestProvenance, &request).await?;
        Ok((response, provenance_sha256))
    }

    async fn upload_one(
        &self,
        entry: &FileEntry,
        directory: &Path,
        storage: &StorageConfig,
    ) -> AttestResult<(String, u32)> {
        let rel = Path::new(&entry.path);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AttestError::validation(format!(
                "manifest path escapes the build directory: {}",
                entry.path
            )));
        }

        let content = tokio::fs::read(directory.join(rel))
            .await
            .map_err(|e| AttestError::new(ErrorKind::Manifest, codes::UPLOAD_FAILED, e.to_string()))?;
        let actual = sha256_hex(&content);
        if actual != entry.content_hash {
            return Err(AttestError::new(
                ErrorKind::Manifest,
                codes::UPLOAD_FAILED,
                format!("content changed since fingerprinting (now {actual})"),
            ));
        }

        let request = UploadBlobRequest {
            path: entry.path.clone(),
            content_sha256: entry.content_hash.clone(),
            size_bytes: entry.size_bytes,
            content_type: entry.content_type.clone(),
            network: storage.network.to_string(),
            epochs: storage.epochs,
            content_base64: STANDARD.encode(&content),
        };
        match &self.blob_store {
            Some(store) => {
                let request = &request;
                let stored = self
                    .policy
                    .run(Operation::UploadBlob.as_str(), &self.cancel_token(), |_| async move {
                        store.put_blob(request).await
                    })
                    .await?;
                Ok((stored.value, stored.retries))
            }
            None => {
                let response: Attempted<UploadBlobResponse> =
                    self.call(Operation::UploadBlob, &request).await?;
                Ok((response.value.blob_id, response.retries))
            }
        }
    }

    /// Upload every manifest entry, tolerating up to
    /// `storage.failure_threshold` per-file failures
    pub async fn upload_artifacts(
        &self,
        manifest: &FileManifest,
        directory: &Path,
        storage: &StorageConfig,
    ) -> AttestResult<UploadResult> {
        let started = Instant::now();
        let mut blob_mapping = BTreeMap::new();
        let mut failures: Vec<UploadFailure> = Vec::new();
        let mut total_size_bytes = 0u64;
        let mut retries = 0u32;
        let cancel = self.cancel_token();

        for entry in &manifest.files {
            if cancel.is_cancelled() {
                return Err(AttestError::cancelled("upload").with_retries(retries));
            }
            match self.upload_one(entry, directory, storage).await {
                Ok((blob_id, spent)) => {
                    debug!(path = %entry.path, %blob_id, "uploaded");
                    blob_mapping.insert(entry.path.clone(), blob_id);
                    total_size_bytes += entry.size_bytes;
                    retries += spent;
                }
                Err(err) if matches!(err.kind, ErrorKind::Cancelled | ErrorKind::Authentication) => {
                    let total = retries + err.retries;
                    return Err(err.with_retries(total));
                }
                Err(err) => {
                    warn!(path = %entry.path, error = %err, "upload failed");
                    retries += err.retries;
                    failures.push(UploadFailure {
                        path: entry.path.clone(),
                        error: err.to_string(),
                    });
                    if failures.len() > storage.failure_threshold {
                        let first = &failures[0];
                        return Err(AttestError::new(
                            ErrorKind::Server,
                            codes::UPLOAD_FAILED,
                            format!(
                                "{} uploads failed (threshold {}); first: {}: {}",
                                failures.len(),
                                storage.failure_threshold,
                                first.path,
                                first.error
                            ),
                        )
                        .with_retries(retries));
                    }
                }
            }
        }

        Ok(UploadResult {
            total_blobs: blob_mapping.len(),
            blob_mapping,
            failures,
            total_size_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
            epochs: storage.epochs,
            retries,
        })
    }

    pub async fn store_provenance(
        &self,
        provenance: &Value,
        evidence: &AttestationEvidence,
    ) -> AttestResult<String> {
        let request = StoreProvenanceRequest {
            attestation_id: evidence.attestation_id.clone(),
            attestation_hash: evidence.attestation_hash.clone(),
            signature: evidence.signature.clone(),
            document: json!({
                "provenance": provenance,
                "evidence": evidence,
            }),
        };
        let response: Attempted<StoreProvenanceResponse> =
            self.call(Operation::StoreProvenance, &request).await?;
        Ok(response.value.blob_id)
    }

    pub async fn update_registry(&self, update: &RegistryUpdate) -> AttestResult<RegistryUpdateResult> {
        let ledger = BackendLedger { channel: self };
        let store: &dyn RegistryStore = match &self.registry {
            Some(store) => store.as_ref(),
            None => &ledger,
        };
        AtomicRegistryUpdater::new(store, self.policy)
            .with_cancel(self.cancel_token())
            .run(update)
            .await
    }

    pub async fn health_check(&self) -> AttestResult<HealthStatus> {
        let started = Instant::now();
        let response: Attempted<HealthResponse> = self.call(Operation::Health, &json!({})).await?;
        Ok(HealthStatus {
            healthy: response.value.healthy,
            region: response.value.region,
            version: response.value.version,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Stop in-flight retries, drop the session and tell the backend, best
    /// effort. Later calls run on a fresh connection token.
    pub async fn disconnect(&self) {
        let retired = std::mem::replace(
            &mut *self.connection.lock().unwrap_or_else(PoisonError::into_inner),
            self.cancel.child(),
        );
        retired.cancel();
        let Some(session) = self.session.clear().await else {
            return;
        };
        let key = ulid::Ulid::new().to_string();
        let empty = json!({});
        let release = self.send_once::<Value>(
            Operation::EndSession,
            &key,
            &empty,
            Some(session.token.as_str()),
        );
        match tokio::time::timeout(self.policy.timeout, release).await {
            Ok(Ok(_)) => debug!("session released"),
            Ok(Err(err)) => debug!(error = %err, "session release failed"),
            Err(_) => debug!("session release timed out"),
        }
    }
}

/// Registry access through the backend's own registry operations
struct BackendLedger<'a> {
    channel: &'a BackendChannel,
}

#[async_trait]
impl RegistryStore for BackendLedger<'_> {
    async fn read_record(&self, domain: &str) -> AttestResult<Option<DomainRecord>> {
        let request = GetDomainRecordRequest {
            domain: domain.to_string(),
        };
        match self
            .channel
            .call::<_, DomainRecord>(Operation::GetDomainRecord, &request)
            .await
        {
            Ok(record) => Ok(Some(record.value)),
            Err(err) if err.code == ErrorCode::NotFound.as_str() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn submit(&self, request: &UpdateRegistryRequest) -> AttestResult<UpdateRegistryResponse> {
        // Conflicts go back to the state machine, which re-reads first.
        self.channel
            .call_inner(Operation::UpdateRegistry, request, false, Ok)
            .await
            .map(|r| r.value)
    }
}

/// Wrap a raw attestation response as evidence
pub fn evidence_from(
    backend: super::types::BackendKind,
    response: Attempted<AttestProvenanceResponse>,
    provenance_sha256: String,
) -> AttestationEvidence {
    let Attempted { value, retries } = response;
    AttestationEvidence {
        backend,
        attestation_id: value.attestation_id,
        signature: value.signature,
        attestation_hash: value.attestation_hash,
        provenance_sha256,
        timestamp: value.timestamp,
        slsa_level: value.slsa_level,
        bundle: value.bundle,
        certificate: value.certificate,
        oidc_issuer: value.oidc_issuer,
        retries,
    }
}
