//! In-process mock attestation backend
//!
//! Implements [`Transport`] directly, so clients under test talk to it
//! exactly as they would to a remote service. It checks sessions and
//! signatures and enforces registry versioning. It also serves
//! server-mediated deployments with a configurable status progression.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use attest_protocol::ops::{
    AttestProvenanceRequest, AttestProvenanceResponse, AuthMethod, AuthenticateRequest,
    AuthenticateResponse, BackendAttestationSummary, DeploymentRequest, DeploymentResponse,
    DeploymentStatus, DomainRecord, GetDomainRecordRequest, HealthResponse,
    ProvenanceStorageSummary, RegistrySummary, StatusRequest, StatusResponse, StorageSummary,
    StoreProvenanceRequest, StoreProvenanceResponse, UpdateRegistryRequest,
    UpdateRegistryResponse, UploadBlobRequest, UploadBlobResponse, VerifyDomainRequest,
    VerifyDomainResponse,
};
use attest_protocol::{BackendRequest, BackendResponse, ErrorCode, Operation, RemoteError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::{Network, Signer, Transport, TransportError, GITHUB_OIDC_ISSUER};
use crate::quilt::{validate_submission, AttestationQuilt, ManifestQuilt, DEFAULT_MAX_QUILT_SIZE};
use crate::signing::{domain_message, domain_verification_hash, sha256_hex, verify_signature, Ed25519Signer};

use super::failure::{FailureConfig, FailureInjector};
use super::state::{CallRecord, MockDeployment, MockSession, MockState, SessionOrigin};

type Handled = Result<Value, RemoteError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse<T: DeserializeOwned>(payload: &Value) -> Result<T, RemoteError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| RemoteError::new(ErrorCode::InvalidRequest, e.to_string()))
}

fn to_payload<T: Serialize>(value: &T) -> Handled {
    serde_json::to_value(value).map_err(|e| RemoteError::new(ErrorCode::Internal, e.to_string()))
}

fn invalid(message: impl Into<String>) -> RemoteError {
    RemoteError::new(ErrorCode::InvalidRequest, message)
}

/// Mock backend behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub session_ttl: Duration,
    /// Issuer accepted for OIDC sessions
    pub oidc_issuer: String,
    pub region: Option<String>,
    /// Status polls before a deployment completes
    pub polls_to_complete: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            oidc_issuer: GITHUB_OIDC_ISSUER.to_string(),
            region: Some("us-east-1".to_string()),
            polls_to_complete: 2,
        }
    }
}

/// Configurable in-process backend for tests
pub struct MockBackend {
    config: MockConfig,
    witness: Ed25519Signer,
    state: Mutex<MockState>,
    failures: Mutex<FailureInjector>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            witness: Ed25519Signer::generate(),
            state: Mutex::new(MockState::new()),
            failures: Mutex::new(FailureInjector::new()),
        }
    }

    // === Test configuration ===

    /// Record `public_key` as the owner key of `domain`
    pub fn register_domain_key(&self, domain: &str, public_key: &str) {
        lock(&self.state)
            .domain_keys
            .insert(domain.to_string(), public_key.to_string());
    }

    /// Put `domain` on record at `version`
    pub fn seed_registry(&self, domain: &str, version: u64) {
        lock(&self.state).commit(domain, version, Value::Null, "seed");
    }

    /// Simulate a concurrent writer before each of the next `times`
    /// registry submits for `domain`
    pub fn race_registry_writes(&self, domain: &str, times: u32) {
        lock(&self.state)
            .pending_races
            .insert(domain.to_string(), times);
    }

    pub fn inject_failure(&self, op: Operation, config: FailureConfig) {
        lock(&self.failures).inject(op, config);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Expire every issued session
    pub fn expire_sessions(&self) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for session in lock(&self.state).sessions.values_mut() {
            session.expires_at = past;
        }
    }

    // === Inspection ===

    pub fn registry_version(&self, domain: &str) -> Option<u64> {
        lock(&self.state).version_of(domain)
    }

    pub fn registry_data(&self, domain: &str) -> Option<Value> {
        lock(&self.state)
            .registry
            .get(domain)
            .map(|e| e.site_data.clone())
    }

    pub fn blob(&self, blob_id: &str) -> Option<Vec<u8>> {
        lock(&self.state).blobs.get(blob_id).cloned()
    }

    pub fn stored_provenance(&self, blob_id: &str) -> Option<Value> {
        lock(&self.state).provenance.get(blob_id).cloned()
    }

    pub fn active_sessions(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    pub fn calls_for(&self, op: Operation) -> Vec<CallRecord> {
        lock(&self.state)
            .calls_for(op)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn call_count(&self, op: Operation) -> usize {
        lock(&self.state).calls_for(op).len()
    }

    /// Public key the mock signs its evidence with
    pub fn witness_key(&self) -> String {
        self.witness.public_key()
    }

    // === Dispatch ===

    /// Handle one request synchronously
    pub fn handle(&self, request: &BackendRequest) -> BackendResponse {
        let result = self
            .check_session(request)
            .and_then(|origin| self.dispatch(request, origin));
        match result {
            Ok(payload) => BackendResponse::success(&request.request_id, payload),
            Err(error) => BackendResponse::failure(&request.request_id, error),
        }
    }

    fn check_session(&self, request: &BackendRequest) -> Result<Option<SessionOrigin>, RemoteError> {
        if !request.op.requires_session() {
            return Ok(None);
        }
        let token = request
            .session_token
            .as_deref()
            .ok_or_else(|| RemoteError::new(ErrorCode::Unauthorized, "session token required"))?;
        let state = lock(&self.state);
        let session = state
            .sessions
            .get(token)
            .ok_or_else(|| RemoteError::new(ErrorCode::Unauthorized, "unknown session"))?;
        if session.expires_at <= Utc::now() {
            return Err(RemoteError::new(ErrorCode::SessionExpired, "session expired"));
        }
        Ok(Some(session.origin))
    }

    fn dispatch(&self, request: &BackendRequest, origin: Option<SessionOrigin>) -> Handled {
        let payload = &request.payload;
        match request.op {
            Operation::Authenticate => self.handle_authenticate(parse(payload)?),
            Operation::EndSession => {
                if let Some(token) = &request.session_token {
                    lock(&self.state).sessions.remove(token);
                }
                Ok(json!({}))
            }
            Operation::VerifyDomain => self.handle_verify_domain(parse(payload)?, origin),
            Operation::AttestProvenance => self.handle_attest(parse(payload)?, origin),
            Operation::UploadBlob => self.handle_upload(parse(payload)?),
            Operation::StoreProvenance => self.handle_store_provenance(parse(payload)?),
            Operation::GetDomainRecord => self.handle_get_record(parse(payload)?),
            Operation::UpdateRegistry => {
                self.handle_update_registry(parse(payload)?, &request.idempotency_key)
            }
            Operation::Health => to_payload(&HealthResponse {
                healthy: true,
                region: self.config.region.clone(),
                version: Some(attest_protocol::CLIENT_VERSION.to_string()),
            }),
            Operation::SubmitDeployment => self.handle_submit_deployment(parse(payload)?),
            Operation::DeploymentStatus => self.handle_status(parse(payload)?),
        }
    }

    fn handle_authenticate(&self, request: AuthenticateRequest) -> Handled {
        let origin = match &request.method {
            AuthMethod::Ed25519Challenge {
                public_key,
                challenge,
                signature,
            } => {
                let valid = verify_signature(public_key, challenge.as_bytes(), signature)
                    .map_err(|e| RemoteError::new(ErrorCode::Unauthorized, e.to_string()))?;
                if !valid {
                    return Err(RemoteError::new(ErrorCode::Unauthorized, "challenge signature invalid"));
                }
                SessionOrigin::Ed25519
            }
            AuthMethod::OidcToken { id_token, issuer } => {
                if id_token.is_empty() || *issuer != self.config.oidc_issuer {
                    return Err(RemoteError::new(ErrorCode::Unauthorized, "identity token rejected"));
                }
                SessionOrigin::Oidc
            }
        };

        let ttl = chrono::Duration::from_std(self.config.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let token = format!("sess-{}", uuid::Uuid::new_v4());
        let expires_at = Utc::now() + ttl;
        lock(&self.state)
            .sessions
            .insert(token.clone(), MockSession { origin, expires_at });
        to_payload(&AuthenticateResponse {
            session_token: token,
            expires_at,
        })
    }

    fn attestation_type(origin: Option<SessionOrigin>) -> &'static str {
        match origin {
            Some(SessionOrigin::Oidc) => "github-oidc",
            _ => "aws-nitro",
        }
    }

    fn handle_verify_domain(
        &self,
        request: VerifyDomainRequest,
        origin: Option<SessionOrigin>,
    ) -> Handled {
        if request.domain_verification_hash != domain_verification_hash(&request.domain) {
            return Err(invalid("domain verification hash does not match domain"));
        }
        let key = lock(&self.state)
            .domain_keys
            .get(&request.domain)
            .cloned()
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, "domain has no registered key"))?;
        let verified = verify_signature(&key, domain_message(&request.domain).as_bytes(), &request.signature)
            .unwrap_or(false);

        let timestamp = now_rfc3339();
        let attestation_hash = sha256_hex(format!("{}:{verified}:{timestamp}", request.domain).as_bytes());
        let attestation_document = match origin {
            Some(SessionOrigin::Oidc) => None,
            _ => Some(STANDARD.encode(
                json!({"module_id": "mock-enclave", "digest": attestation_hash}).to_string(),
            )),
        };
        to_payload(&VerifyDomainResponse {
            verified,
            signature: self.witness.sign(attestation_hash.as_bytes()),
            attestation_hash,
            attestation_document,
            timestamp,
            attestation_type: Self::attestation_type(origin).to_string(),
        })
    }

    fn handle_attest(&self, request: AttestProvenanceRequest, origin: Option<SessionOrigin>) -> Handled {
        let canonical = serde_json_canonicalizer::to_vec(&request.provenance)
            .map_err(|e| invalid(e.to_string()))?;
        if sha256_hex(&canonical) != request.provenance_sha256 {
            return Err(RemoteError::new(
                ErrorCode::AttestationRefused,
                "provenance digest does not match document",
            ));
        }
        let subjects = request
            .provenance
            .get("subject")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if subjects != request.subject_count {
            return Err(RemoteError::new(ErrorCode::AttestationRefused, "subject count mismatch"));
        }

        let attestation_hash =
            sha256_hex(format!("{}:{}", request.provenance_sha256, request.manifest_hash).as_bytes());
        let signature = self.witness.sign(attestation_hash.as_bytes());
        let (bundle, certificate, oidc_issuer) = match origin {
            Some(SessionOrigin::Oidc) => (
                json!({
                    "mediaType": "application/vnd.dev.sigstore.bundle+json;version=0.2",
                    "verificationMaterial": {
                        "tlogEntries": [{"logIndex": lock(&self.state).provenance.len() + 1}]
                    },
                    "dsseEnvelope": {"signatures": [{"sig": signature}]}
                }),
                Some(format!("-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----", self.witness.public_key())),
                Some(self.config.oidc_issuer.clone()),
            ),
            _ => (
                json!({
                    "attestation_document": STANDARD.encode(
                        json!({"module_id": "mock-enclave", "user_data": attestation_hash}).to_string()
                    ),
                    "pcrs": {"0": "0".repeat(96)}
                }),
                None,
                None,
            ),
        };
        to_payload(&AttestProvenanceResponse {
            attestation_id: format!("att-{}", uuid::Uuid::new_v4()),
            signature,
            attestation_hash,
            timestamp: now_rfc3339(),
            slsa_level: 3,
            bundle,
            certificate,
            oidc_issuer,
        })
    }

    fn handle_upload(&self, request: UploadBlobRequest) -> Handled {
        request
            .network
            .parse::<Network>()
            .map_err(invalid)?;
        let content = STANDARD
            .decode(&request.content_base64)
            .map_err(|e| invalid(e.to_string()))?;
        let digest = sha256_hex(&content);
        if digest != request.content_sha256 || content.len() as u64 != request.size_bytes {
            return Err(invalid(format!("{}: content does not match digest", request.path)));
        }
        let blob_id = format!("blob-{}", &digest[..16]);
        lock(&self.state).blobs.insert(blob_id.clone(), content);
        to_payload(&UploadBlobResponse { blob_id })
    }

    fn handle_store_provenance(&self, request: StoreProvenanceRequest) -> Handled {
        if request.attestation_hash.len() < 16 {
            return Err(invalid("attestation hash too short"));
        }
        let blob_id = format!("prov-{}", &request.attestation_hash[..16]);
        lock(&self.state)
            .provenance
            .insert(blob_id.clone(), request.document);
        to_payload(&StoreProvenanceResponse { blob_id })
    }

    fn handle_get_record(&self, request: GetDomainRecordRequest) -> Handled {
        let state = lock(&self.state);
        let entry = state
            .registry
            .get(&request.domain)
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, "domain not registered"))?;
        to_payload(&DomainRecord {
            domain: request.domain.clone(),
            version: Some(entry.version.to_string()),
            last_updated: Some(entry.last_updated.to_rfc3339_opts(SecondsFormat::Millis, true)),
        })
    }

    fn handle_update_registry(&self, request: UpdateRegistryRequest, idempotency_key: &str) -> Handled {
        let mut state = lock(&self.state);

        if let Some(key) = state.domain_keys.get(&request.domain) {
            let valid = verify_signature(key, domain_message(&request.domain).as_bytes(), &request.signature)
                .unwrap_or(false);
            if !valid {
                return Err(RemoteError::new(ErrorCode::InvalidSignature, "registry signature invalid"));
            }
        } else if request.signature.is_empty() {
            return Err(RemoteError::new(ErrorCode::InvalidSignature, "registry update is unsigned"));
        }

        if let Some(tx) = state.applied_updates.get(idempotency_key).cloned() {
            let version = state.version_of(&request.domain).unwrap_or(0);
            return to_payload(&UpdateRegistryResponse {
                new_version: version.to_string(),
                transaction_id: tx,
                block_hash: None,
            });
        }

        let raced = match state.pending_races.get_mut(&request.domain) {
            Some(races) if *races > 0 => {
                *races -= 1;
                true
            }
            _ => false,
        };
        if raced {
            let bumped = state.version_of(&request.domain).unwrap_or(0) + 1;
            let data = state
                .registry
                .get(&request.domain)
                .map(|e| e.site_data.clone())
                .unwrap_or(Value::Null);
            state.commit(&request.domain, bumped, data, "concurrent-writer");
        }

        let current = state.version_of(&request.domain);
        let current_str = current.map(|v| v.to_string());
        if request.atomic_transaction && request.expected_version != current_str {
            return Err(RemoteError::version_conflict(
                &request.domain,
                request.expected_version.as_deref(),
                current_str.as_deref(),
            ));
        }
        let next = current.unwrap_or(0) + 1;
        if request.atomic_transaction && request.new_version != next.to_string() {
            return Err(invalid(format!(
                "new version {} does not follow {}",
                request.new_version,
                current.unwrap_or(0)
            )));
        }

        let digest = sha256_hex(format!("{}:{next}:{idempotency_key}", request.domain).as_bytes());
        let tx = format!("0x{}", &digest[..40]);
        state.commit(&request.domain, next, request.site_data, &tx);
        state
            .applied_updates
            .insert(idempotency_key.to_string(), tx.clone());
        to_payload(&UpdateRegistryResponse {
            new_version: next.to_string(),
            transaction_id: tx,
            block_hash: Some(format!("0x{digest}")),
        })
    }

    fn handle_submit_deployment(&self, request: DeploymentRequest) -> Handled {
        request.network.parse::<Network>().map_err(invalid)?;
        let manifest: ManifestQuilt = parse(&request.manifest_quilt)?;
        let attestation: AttestationQuilt = parse(&request.attestation_quilt)?;
        validate_submission(&manifest, &attestation, DEFAULT_MAX_QUILT_SIZE)
            .map_err(|e| invalid(e.to_string()))?;
        if manifest.domain != request.domain {
            return Err(invalid("quilt domain does not match request domain"));
        }

        let blob_mapping = manifest
            .files_manifest
            .files
            .iter()
            .map(|f| (f.path.clone(), format!("blob-{}", &f.content_hash[..16.min(f.content_hash.len())])))
            .collect();
        let request_id = format!("dep-{}", uuid::Uuid::new_v4());

        let mut state = lock(&self.state);
        let next = state.version_of(&request.domain).unwrap_or(0) + 1;
        let digest = sha256_hex(format!("{}:{next}:{request_id}", request.domain).as_bytes());
        let tx = format!("0x{}", &digest[..40]);
        state.commit(
            &request.domain,
            next,
            json!({"manifest_quilt_hash": manifest.quilt_hash}),
            &tx,
        );

        let response = DeploymentResponse {
            success: true,
            request_id: request_id.clone(),
            domain_verified: true,
            verification_timestamp: now_rfc3339(),
            storage: StorageSummary {
                blob_mapping,
                total_blobs: manifest.files_manifest.total_files,
                total_size_bytes: manifest.files_manifest.total_size_bytes,
                upload_duration_ms: 0,
                storage_epochs: 5,
            },
            provenance_storage: ProvenanceStorageSummary {
                blob_id: format!("prov-{}", &attestation.quilt_hash[..16]),
                storage_timestamp: now_rfc3339(),
            },
            registry_update: RegistrySummary {
                success: true,
                new_version: next.to_string(),
                transaction_id: tx,
                block_hash: Some(format!("0x{digest}")),
            },
            backend_attestation: BackendAttestationSummary {
                measurement_hash: sha256_hex(manifest.quilt_hash.as_bytes()),
                attestation_signature: self.witness.sign(manifest.quilt_hash.as_bytes()),
                timestamp: now_rfc3339(),
                certificate: self.witness.public_key(),
            },
            error: None,
            error_code: None,
            retry_after: None,
        };
        state.deployments.insert(
            request_id,
            MockDeployment {
                response: response.clone(),
                polls: 0,
                status: DeploymentStatus::Pending,
            },
        );
        to_payload(&response)
    }

    fn handle_status(&self, request: StatusRequest) -> Handled {
        let polls_to_complete = self.config.polls_to_complete.max(1);
        let mut state = lock(&self.state);
        let deployment = state
            .deployments
            .get_mut(&request.request_id)
            .ok_or_else(|| RemoteError::new(ErrorCode::NotFound, "unknown deployment"))?;
        deployment.polls += 1;
        deployment.status = if deployment.polls >= polls_to_complete {
            DeploymentStatus::Completed
        } else {
            DeploymentStatus::Processing
        };
        let completed = deployment.status == DeploymentStatus::Completed;
        let progress = (deployment.polls.min(polls_to_complete) * 100 / polls_to_complete) as u8;
        to_payload(&StatusResponse {
            request_id: request.request_id.clone(),
            status: deployment.status,
            progress_percentage: progress,
            current_step: if completed { "completed" } else { "storage_upload" }.to_string(),
            estimated_completion_time: None,
            result: completed.then(|| deployment.response.clone()),
            error: None,
        })
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, TransportError> {
        lock(&self.state).calls.push(CallRecord {
            op: request.op,
            request_id: request.request_id.clone(),
            idempotency_key: request.idempotency_key.clone(),
        });

        let injected = lock(&self.failures).check(request.op);
        if let Some(config) = injected {
            if let Some(delay) = config.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = config.error {
                return Ok(BackendResponse::failure(&request.request_id, error));
            }
        }
        Ok(self.handle(request))
    }
}
