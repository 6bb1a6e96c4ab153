//! Backend clients against the in-process mock backend
//!
//! - sessions: established once, reused, released on disconnect, and
//!   re-established on the same client afterwards
//! - retry budget and idempotency keys across retries
//! - domain verification outcomes
//! - attestation and upload through both client variants

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attest_protocol::ops::UploadBlobRequest;
use attest_protocol::{ErrorCode, Operation};
use site_attest::client::{
    codes, AttestError, AttestResult, BackendKind, BlobStore, IdentityTokenSource, OidcConfig, Signer, StaticTokenSource, StorageConfig,
    TeeConfig, Transport, GITHUB_OIDC_ISSUER,
};
use site_attest::mock::{FailureConfig, MockBackend};
use site_attest::provenance::{build_provenance, ProvenanceFormat};
use site_attest::signing::Ed25519Signer;
use site_attest::{
    AttestationBackend, BuildContext, CancelToken, ErrorKind, FileManifest, FingerprintConfig, FingerprintEngine,
    OidcClient, RetryPolicy, TeeClient,
};
use tempfile::TempDir;

const DOMAIN: &str = "example.com";

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        exponential: true,
        timeout: Duration::from_secs(2),
    }
}

fn tee_client(mock: &Arc<MockBackend>, signer: &Arc<Ed25519Signer>, max_retries: u32) -> TeeClient {
    let transport: Arc<dyn Transport> = mock.clone();
    TeeClient::new(transport, signer.clone(), fast_policy(max_retries), TeeConfig::default())
}

fn oidc_client(mock: &Arc<MockBackend>, issuer: &str) -> OidcClient {
    let transport: Arc<dyn Transport> = mock.clone();
    let tokens: Arc<dyn IdentityTokenSource> = Arc::new(StaticTokenSource::new("eyJ.jwt.sig", issuer));
    OidcClient::new(transport, tokens, fast_policy(2), OidcConfig::default())
}

fn setup() -> (Arc<MockBackend>, Arc<Ed25519Signer>) {
    let mock = Arc::new(MockBackend::new());
    let signer = Arc::new(Ed25519Signer::generate());
    mock.register_domain_key(DOMAIN, &signer.public_key());
    (mock, signer)
}

fn context() -> BuildContext {
    let vars: HashMap<String, String> = [
        ("GITHUB_REPOSITORY", "acme/site"),
        ("GITHUB_SHA", "0123456789abcdef0123456789abcdef01234567"),
        ("GITHUB_ACTOR", "octocat"),
        ("GITHUB_WORKFLOW", "deploy"),
        ("GITHUB_RUN_ID", "11"),
        ("GITHUB_REF", "refs/heads/main"),
        ("GITHUB_EVENT_NAME", "push"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    BuildContext::from_env_map(&vars, "2026-02-01T08:00:00Z", "2026-02-01T08:02:00Z").unwrap()
}

fn site(dir: &Path) -> FileManifest {
    fs::write(dir.join("index.html"), b"<h1>welcome</h1>").unwrap();
    fs::write(dir.join("robots.txt"), b"User-agent: *").unwrap();
    FingerprintEngine::new(FingerprintConfig {
        emit_progress: false,
        ..FingerprintConfig::default()
    })
    .unwrap()
    .generate(dir, DOMAIN, None)
    .unwrap()
}

// === Sessions ===

#[tokio::test]
async fn test_tee_session_is_reused() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);

    let first = client.authenticate().await.unwrap();
    let second = client.authenticate().await.unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(mock.call_count(Operation::Authenticate), 1);
    assert_eq!(mock.active_sessions(), 1);
}

#[tokio::test]
async fn test_disconnect_releases_session() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    client.authenticate().await.unwrap();
    assert_eq!(mock.active_sessions(), 1);

    client.disconnect().await;
    assert_eq!(mock.active_sessions(), 0);
    assert_eq!(mock.call_count(Operation::EndSession), 1);

    let err = client
        .verify_domain_ownership(DOMAIN, &signer.sign_domain(DOMAIN))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
}

#[tokio::test]
async fn test_client_reconnects_after_disconnect() {
    let (mock, signer) = setup();
    let caller = CancelToken::new();
    let client = tee_client(&mock, &signer, 2).with_cancel(caller.clone());

    client.authenticate().await.unwrap();
    client.disconnect().await;
    assert!(!caller.is_cancelled());

    let session = client.authenticate().await.unwrap();
    assert!(!session.reused);
    assert_eq!(mock.call_count(Operation::Authenticate), 2);
    assert_eq!(mock.active_sessions(), 1);
    let verification = client
        .verify_domain_ownership(DOMAIN, &signer.sign_domain(DOMAIN))
        .await
        .unwrap();
    assert!(verification.verified);
    assert!(client.health_check().await.unwrap().healthy);
}

#[tokio::test]
async fn test_disconnect_stops_retries_in_flight() {
    let (mock, signer) = setup();
    let transport: Arc<dyn Transport> = mock.clone();
    let policy = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(300),
        max_delay: Duration::from_secs(1),
        exponential: false,
        timeout: Duration::from_secs(2),
    };
    let client = Arc::new(TeeClient::new(transport, signer.clone(), policy, TeeConfig::default()));
    client.authenticate().await.unwrap();
    mock.inject_failure(
        Operation::VerifyDomain,
        FailureConfig::error(ErrorCode::Unavailable, "maintenance"),
    );

    let verifying = {
        let client = Arc::clone(&client);
        let signature = signer.sign_domain(DOMAIN);
        tokio::spawn(async move { client.verify_domain_ownership(DOMAIN, &signature).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect().await;

    let err = verifying.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(err.message.contains("UNAVAILABLE"), "{}", err.message);
    assert_eq!(mock.call_count(Operation::VerifyDomain), 1);
}

#[tokio::test]
async fn test_calls_without_session_rejected_locally() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    let err = client
        .verify_domain_ownership(DOMAIN, &signer.sign_domain(DOMAIN))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(mock.call_count(Operation::VerifyDomain), 0);
}

// === Retry ===

#[tokio::test]
async fn test_retry_budget_is_max_retries_plus_one() {
    let (mock, signer) = setup();
    mock.inject_failure(Operation::Health, FailureConfig::unavailable());
    let client = tee_client(&mock, &signer, 3);

    let err = client.health_check().await.unwrap_err();
    assert!(err.retryable);
    assert_eq!(err.retries, 3);
    assert_eq!(err.code, ErrorCode::Unavailable.as_str());
    assert_eq!(mock.call_count(Operation::Health), 4);
}

#[tokio::test]
async fn test_idempotency_key_stable_across_retries() {
    let (mock, signer) = setup();
    mock.inject_failure(Operation::Health, FailureConfig::unavailable().with_fail_count(2));
    let client = tee_client(&mock, &signer, 3);

    let health = client.health_check().await.unwrap();
    assert!(health.healthy);

    let calls = mock.calls_for(Operation::Health);
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.idempotency_key == calls[0].idempotency_key));
    assert_ne!(calls[0].request_id, calls[1].request_id);

    client.health_check().await.unwrap();
    let calls = mock.calls_for(Operation::Health);
    assert_ne!(calls[3].idempotency_key, calls[0].idempotency_key);
}

#[tokio::test]
async fn test_non_retryable_error_is_not_retried() {
    let (mock, signer) = setup();
    mock.inject_failure(Operation::Health, FailureConfig::error(ErrorCode::InvalidRequest, "bad"));
    let client = tee_client(&mock, &signer, 3);

    let err = client.health_check().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.retries, 0);
    assert_eq!(mock.call_count(Operation::Health), 1);
}

#[tokio::test]
async fn test_rate_limit_hint_is_capped_by_max_delay() {
    let (mock, signer) = setup();
    mock.inject_failure(Operation::Health, FailureConfig::rate_limited(30).with_fail_count(1));
    let client = tee_client(&mock, &signer, 2);

    let started = std::time::Instant::now();
    client.health_check().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(mock.call_count(Operation::Health), 2);
}

// === Domain verification ===

#[tokio::test]
async fn test_verify_domain_with_registered_key() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    client.authenticate().await.unwrap();

    let verification = client
        .verify_domain_ownership(DOMAIN, &signer.sign_domain(DOMAIN))
        .await
        .unwrap();
    assert!(verification.verified);
    assert_eq!(verification.retry_count, 0);
    assert_eq!(verification.attestation_type, "aws-nitro");
    assert!(verification.attestation_document.is_some());
}

#[tokio::test]
async fn test_verify_domain_with_foreign_key() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    client.authenticate().await.unwrap();

    let stranger = Ed25519Signer::generate();
    let verification = client
        .verify_domain_ownership(DOMAIN, &stranger.sign_domain(DOMAIN))
        .await
        .unwrap();
    assert!(!verification.verified);
}

#[tokio::test]
async fn test_verify_domain_exhausted_retries_reports_unverified() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    client.authenticate().await.unwrap();
    mock.inject_failure(Operation::VerifyDomain, FailureConfig::unavailable());

    let verification = client
        .verify_domain_ownership(DOMAIN, &signer.sign_domain(DOMAIN))
        .await
        .unwrap();
    assert!(!verification.verified);
    assert_eq!(verification.retry_count, 2);
    assert!(verification.error.is_some());
    assert_eq!(mock.call_count(Operation::VerifyDomain), 3);
}

// === Attestation and upload ===

#[tokio::test]
async fn test_tee_attestation_and_upload() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    let dir = TempDir::new().unwrap();
    let manifest = site(dir.path());
    let provenance = build_provenance(&manifest, &context(), ProvenanceFormat::V11)
        .to_value()
        .unwrap();

    client.authenticate().await.unwrap();
    let evidence = client
        .attest_provenance(&provenance, &manifest, &context())
        .await
        .unwrap();
    assert_eq!(evidence.backend, BackendKind::Tee);
    assert_eq!(evidence.slsa_level, 3);
    assert_eq!(evidence.provenance_sha256.len(), 64);
    assert!(evidence.bundle.get("attestation_document").is_some());

    let upload = client
        .upload_artifacts(&manifest, dir.path(), &StorageConfig::default())
        .await
        .unwrap();
    assert_eq!(upload.total_blobs, 2);
    assert!(upload.failures.is_empty());
    let blob_id = &upload.blob_mapping["index.html"];
    assert_eq!(mock.blob(blob_id).unwrap(), b"<h1>welcome</h1>".to_vec());

    let stored = client.store_provenance(&provenance, &evidence).await.unwrap();
    let document = mock.stored_provenance(&stored).unwrap();
    assert_eq!(document["provenance"], provenance);
}

#[tokio::test]
async fn test_invalid_provenance_never_reaches_backend() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 2);
    let dir = TempDir::new().unwrap();
    let manifest = site(dir.path());
    let mut provenance = build_provenance(&manifest, &context(), ProvenanceFormat::V11)
        .to_value()
        .unwrap();
    provenance.as_object_mut().unwrap().remove("subject");

    client.authenticate().await.unwrap();
    let err = client
        .attest_provenance(&provenance, &manifest, &context())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(mock.call_count(Operation::AttestProvenance), 0);
}

#[tokio::test]
async fn test_upload_failure_threshold() {
    let (mock, signer) = setup();
    let client = tee_client(&mock, &signer, 0);
    let dir = TempDir::new().unwrap();
    let manifest = site(dir.path());
    client.authenticate().await.unwrap();
    mock.inject_failure(Operation::UploadBlob, FailureConfig::error(ErrorCode::Internal, "disk full"));

    let err = client
        .upload_artifacts(&manifest, dir.path(), &StorageConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::UPLOAD_FAILED);

    let tolerant = StorageConfig {
        failure_threshold: 2,
        ..StorageConfig::default()
    };
    let upload = client
        .upload_artifacts(&manifest, dir.path(), &tolerant)
        .await
        .unwrap();
    assert_eq!(upload.total_blobs, 0);
    assert_eq!(upload.failures.len(), 2);
}

/// Blob store that drops the first `failures` writes
struct FlakyStore {
    failures: AtomicU32,
    puts: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            puts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn put_blob(&self, request: &UploadBlobRequest) -> AttestResult<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(AttestError::connection("reset"));
        }
        Ok(format!("walrus-{}", &request.content_sha256[..12]))
    }
}

#[tokio::test]
async fn test_blob_store_uploads_are_retried() {
    let (mock, signer) = setup();
    let store = Arc::new(FlakyStore::new(1));
    let client = tee_client(&mock, &signer, 3).with_blob_store(store.clone());
    let dir = TempDir::new().unwrap();
    let manifest = site(dir.path());
    client.authenticate().await.unwrap();

    let upload = client
        .upload_artifacts(&manifest, dir.path(), &StorageConfig::default())
        .await
        .unwrap();
    assert_eq!(upload.total_blobs, 2);
    assert!(upload.failures.is_empty());
    assert_eq!(upload.retries, 1);
    assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    assert_eq!(mock.call_count(Operation::UploadBlob), 0);
}

#[tokio::test]
async fn test_blob_store_failures_exhaust_budget() {
    let (mock, signer) = setup();
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let client = tee_client(&mock, &signer, 2).with_blob_store(store.clone());
    let dir = TempDir::new().unwrap();
    let manifest = site(dir.path());
    client.authenticate().await.unwrap();

    let err = client
        .upload_artifacts(&manifest, dir.path(), &StorageConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::UPLOAD_FAILED);
    assert_eq!(err.retries, 2);
    assert_eq!(store.puts.load(Ordering::SeqCst), 3);
}

// === OIDC ===

#[tokio::test]
async fn test_oidc_attestation_carries_certificate() {
    let (mock, signer) = setup();
    let client = oidc_client(&mock, GITHUB_OIDC_ISSUER);
    let dir = TempDir::new().unwrap();
    let manifest = site(dir.path());
    let provenance = build_provenance(&manifest, &context(), ProvenanceFormat::V11)
        .to_value()
        .unwrap();

    client.authenticate().await.unwrap();
    let verification = client
        .verify_domain_ownership(DOMAIN, &signer.sign_domain(DOMAIN))
        .await
        .unwrap();
    assert!(verification.verified);
    assert_eq!(verification.attestation_type, "github-oidc");

    let evidence = client
        .attest_provenance(&provenance, &manifest, &context())
        .await
        .unwrap();
    assert_eq!(evidence.backend, BackendKind::Oidc);
    assert!(evidence.certificate.is_some());
    assert_eq!(evidence.oidc_issuer.as_deref(), Some(GITHUB_OIDC_ISSUER));

    assert!(client.authenticate().await.unwrap().reused);
    assert_eq!(mock.call_count(Operation::Authenticate), 1);
}

#[tokio::test]
async fn test_oidc_rejects_unexpected_issuer_before_calling() {
    let (mock, _) = setup();
    let client = oidc_client(&mock, "https://issuer.example");

    let err = client.authenticate().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(mock.call_count(Operation::Authenticate), 0);
}
