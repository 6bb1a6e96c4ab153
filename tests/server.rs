//! Server-mediated deployments against the mock backend

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use attest_protocol::ops::DeploymentStatus;
use attest_protocol::Operation;
use chrono::Utc;
use serde_json::json;
use site_attest::client::{Network, Transport};
use site_attest::mock::{FailureConfig, MockBackend, MockConfig};
use site_attest::quilt::{
    build_attestation_quilt, build_manifest_quilt, DeploymentMetadata, DomainVerificationEvidence,
    IdentityAttestation, ProvenanceAttestationEvidence,
};
use site_attest::server::client_info;
use site_attest::{
    AttestationQuilt, CancelToken, DeploymentClient, ErrorKind, FingerprintConfig,
    FingerprintEngine, ManifestQuilt, RetryPolicy,
};
use tempfile::TempDir;

const DOMAIN: &str = "shop.example.com";

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        exponential: true,
        timeout: Duration::from_secs(2),
    }
}

fn quilts() -> (ManifestQuilt, AttestationQuilt) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.html"), b"<h1>shop</h1>").unwrap();
    fs::write(dir.path().join("cart.js"), b"export {}").unwrap();
    let manifest = FingerprintEngine::new(FingerprintConfig {
        emit_progress: false,
        ..FingerprintConfig::default()
    })
    .unwrap()
    .generate(dir.path(), DOMAIN, None)
    .unwrap();

    let now = Utc::now().to_rfc3339();
    let manifest_quilt = build_manifest_quilt(
        DOMAIN,
        &manifest,
        DeploymentMetadata {
            build_timestamp: now.clone(),
            github_repo: "acme/shop".to_string(),
            commit_sha: "c0ffee".repeat(6) + "c0ff",
            workflow_ref: "acme/shop/.github/workflows/ship.yml@refs/heads/main".to_string(),
            deployment_target: "production".to_string(),
        },
    )
    .unwrap();
    let attestation_quilt = build_attestation_quilt(
        DOMAIN,
        DomainVerificationEvidence {
            domain_verification_hash: "a".repeat(64),
            domain_signature: "c2ln".to_string(),
            signature_timestamp: now.clone(),
        },
        IdentityAttestation {
            hash: "b".repeat(64),
            signature: "d2l0".to_string(),
            timestamp: now.clone(),
            attestation_type: "github-oidc".to_string(),
            run_id: 55,
            repository: "acme/shop".to_string(),
            workflow: "ship".to_string(),
            commit_sha: "c0ffee".repeat(6) + "c0ff",
            workflow_ref: "acme/shop/.github/workflows/ship.yml@refs/heads/main".to_string(),
        },
        ProvenanceAttestationEvidence {
            cosign_signature: "Y29z".to_string(),
            attestation_id: "att-55".to_string(),
            sigstore_bundle: json!({"mediaType": "application/vnd.dev.sigstore.bundle+json;version=0.2"}),
            timestamp: now,
            slsa_level: 3,
            attestation_hash: "c".repeat(64),
            oidc_issuer: "https://token.actions.githubusercontent.com".to_string(),
            certificate: None,
        },
    )
    .unwrap();
    (manifest_quilt, attestation_quilt)
}

fn client(mock: &Arc<MockBackend>) -> DeploymentClient {
    let transport: Arc<dyn Transport> = mock.clone();
    DeploymentClient::new(transport, policy(), client_info("55", "acme/shop"))
}

#[tokio::test]
async fn test_submit_and_poll_until_complete() {
    let mock = Arc::new(MockBackend::new());
    let client = client(&mock);
    let (manifest, attestation) = quilts();
    let request = client
        .build_request(&manifest, &attestation, Network::Testnet, "production")
        .unwrap();

    let submitted = client.submit_deployment(&request).await.unwrap();
    let response = submitted.value;
    assert!(response.success);
    assert_eq!(submitted.retries, 0);
    assert_eq!(response.registry_update.new_version, "1");
    assert_eq!(response.storage.total_blobs, 2);
    assert_eq!(mock.registry_version(DOMAIN), Some(1));

    let status = client
        .poll_until_complete(&response.request_id, Duration::from_millis(1), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(status.status, DeploymentStatus::Completed);
    assert_eq!(status.progress_percentage, 100);
    assert_eq!(status.result.unwrap().request_id, response.request_id);
    assert_eq!(mock.call_count(Operation::DeploymentStatus), 2);
}

#[tokio::test]
async fn test_polling_gives_up_after_max_wait() {
    let mock = Arc::new(MockBackend::with_config(MockConfig {
        polls_to_complete: 1000,
        ..MockConfig::default()
    }));
    let client = client(&mock);
    let (manifest, attestation) = quilts();
    let request = client
        .build_request(&manifest, &attestation, Network::Testnet, "production")
        .unwrap();
    let response = client.submit_deployment(&request).await.unwrap().value;

    let err = client
        .poll_until_complete(&response.request_id, Duration::from_millis(10), Duration::from_millis(25))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(mock.call_count(Operation::DeploymentStatus) >= 2);
}

#[tokio::test]
async fn test_inconsistent_request_rejected_before_submit() {
    let mock = Arc::new(MockBackend::new());
    let client = client(&mock);
    let (manifest, attestation) = quilts();
    let mut request = client
        .build_request(&manifest, &attestation, Network::Mainnet, "production")
        .unwrap();
    request.domain = "elsewhere.example.com".to_string();

    let err = client.submit_deployment(&request).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(mock.call_count(Operation::SubmitDeployment), 0);

    let mut tampered = client
        .build_request(&manifest, &attestation, Network::Mainnet, "production")
        .unwrap();
    tampered.manifest_quilt["metadata"]["commit_sha"] = json!("0".repeat(40));
    let err = client.submit_deployment(&tampered).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(mock.call_count(Operation::SubmitDeployment), 0);
}

#[tokio::test]
async fn test_rate_limited_submit_is_retried() {
    let mock = Arc::new(MockBackend::new());
    mock.inject_failure(
        Operation::SubmitDeployment,
        FailureConfig::rate_limited(1).with_fail_count(1),
    );
    let client = client(&mock);
    let (manifest, attestation) = quilts();
    let request = client
        .build_request(&manifest, &attestation, Network::Testnet, "production")
        .unwrap();

    let submitted = client.submit_deployment(&request).await.unwrap();
    assert_eq!(submitted.retries, 1);
    assert_eq!(mock.call_count(Operation::SubmitDeployment), 2);
}

#[tokio::test]
async fn test_unknown_deployment_status() {
    let mock = Arc::new(MockBackend::new());
    let err = client(&mock).get_status("dep-missing").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Server);
    assert!(!err.retryable);
}

#[tokio::test]
async fn test_cancelled_client_stops_polling() {
    let mock = Arc::new(MockBackend::new());
    let token = CancelToken::new();
    token.cancel();
    let err = client(&mock)
        .with_cancel(token)
        .poll_until_complete("dep-any", Duration::from_millis(1), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(mock.call_count(Operation::DeploymentStatus), 0);
}
