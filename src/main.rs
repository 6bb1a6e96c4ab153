//! site-attest CLI
//!
//! Entry point for the `site-attest` command-line tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use site_attest::cancel::{SignalState, EXIT_CODE_CANCELLED};
use site_attest::client::{
    AttestationBackend, BackendKind, HttpTransport, Network, OidcClient, StaticTokenSource,
    TeeClient, Transport,
};
use site_attest::config::EffectiveConfig;
use site_attest::fingerprint::FingerprintEngine;
use site_attest::pipeline::DeploymentPipeline;
use site_attest::provenance::{build_provenance, BuildContext, ProvenanceFormat, ProvenanceValidator};
use site_attest::quilt::{build_manifest_quilt, validate_quilt, DeploymentMetadata};
use site_attest::server::{client_info, DeploymentClient, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
use site_attest::signing::Ed25519Signer;
use site_attest::CancelToken;

/// Base64 Ed25519 secret used for TEE sessions and domain signatures
const SIGNING_KEY_VAR: &str = "SITE_ATTEST_SIGNING_KEY";

/// Identity token for OIDC sessions
const OIDC_TOKEN_VAR: &str = "SITE_ATTEST_OIDC_TOKEN";

#[derive(Parser)]
#[command(name = "site-attest")]
#[command(about = "Fingerprint, attest and register static site deployments", version)]
struct Cli {
    /// Path to repo config file (default: ./.site-attest.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a build directory and print the manifest
    Manifest {
        dir: PathBuf,

        #[arg(long, short = 'd')]
        domain: String,

        /// Worker count (0 = available parallelism)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write the manifest here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Build provenance for a build directory from the GitHub Actions environment
    Provenance {
        dir: PathBuf,

        #[arg(long, short = 'd')]
        domain: String,

        /// Predicate shape: legacy or v1_1
        #[arg(long)]
        format: Option<String>,
    },

    /// Validate a provenance document
    Validate {
        file: PathBuf,

        /// Cross-check subjects against this manifest
        #[arg(long, short = 'm')]
        manifest: Option<PathBuf>,

        #[arg(long)]
        strict: bool,

        #[arg(long)]
        allow_deprecated: bool,
    },

    /// Build a manifest quilt, or verify an existing quilt with --verify
    Quilt {
        dir: Option<PathBuf>,

        #[arg(long, short = 'd')]
        domain: Option<String>,

        /// Quilt file to verify
        #[arg(long, conflicts_with = "dir")]
        verify: Option<PathBuf>,
    },

    /// Print the effective configuration with secrets redacted
    Config,

    /// Run a full deployment against the configured backend
    Deploy {
        dir: PathBuf,

        #[arg(long, short = 'd')]
        domain: String,

        /// Backend variant: tee or oidc
        #[arg(long)]
        backend: Option<String>,

        #[arg(long)]
        endpoint: Option<String>,

        /// mainnet or testnet
        #[arg(long)]
        network: Option<String>,

        /// Base64 domain signature; signed with the configured key when omitted
        #[arg(long)]
        signature: Option<String>,
    },

    /// Show or follow a server-mediated deployment
    Status {
        request_id: String,

        /// Poll until the deployment finishes
        #[arg(long)]
        wait: bool,

        #[arg(long)]
        endpoint: Option<String>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Manifest {
            dir,
            domain,
            concurrency,
            output,
        } => run_manifest(cli.config, &dir, &domain, concurrency, output),
        Commands::Provenance { dir, domain, format } => {
            run_provenance(cli.config, &dir, &domain, format)
        }
        Commands::Validate {
            file,
            manifest,
            strict,
            allow_deprecated,
        } => run_validate(cli.config, &file, manifest, strict, allow_deprecated),
        Commands::Quilt {
            dir,
            domain,
            verify,
        } => run_quilt(cli.config, dir, domain, verify),
        Commands::Config => run_config(cli.config),
        Commands::Deploy {
            dir,
            domain,
            backend,
            endpoint,
            network,
            signature,
        } => run_deploy(cli.config, &dir, &domain, backend, endpoint, network, signature),
        Commands::Status {
            request_id,
            wait,
            endpoint,
        } => run_status(cli.config, &request_id, wait, endpoint),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(format!("serializing output: {}", e)),
    }
}

fn load_config(repo_config: Option<PathBuf>, overrides: Option<serde_json::Value>) -> EffectiveConfig {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let result = match repo_config {
        Some(path) => {
            let host = home.map(|h| h.join(site_attest::config::HOST_CONFIG_RELATIVE));
            EffectiveConfig::build(host.as_deref(), Some(&path), overrides)
        }
        None => EffectiveConfig::discover(home.as_deref(), Path::new("."), overrides),
    };
    result.unwrap_or_else(|e| fail(e))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(format!("starting runtime: {}", e)))
}

fn install_signal_handler() -> CancelToken {
    let token = CancelToken::new();
    let state = Arc::new(SignalState::new(token.clone()));
    if let Err(e) = state.install() {
        fail(format!("installing signal handler: {}", e));
    }
    token
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn build_context() -> BuildContext {
    let vars: HashMap<String, String> = std::env::vars().collect();
    let started = vars
        .get("SITE_ATTEST_BUILD_STARTED_ON")
        .cloned()
        .unwrap_or_else(now_rfc3339);
    let finished = vars
        .get("SITE_ATTEST_BUILD_FINISHED_ON")
        .cloned()
        .unwrap_or_else(now_rfc3339);
    BuildContext::from_env_map(&vars, started, finished).unwrap_or_else(|e| fail(e))
}

fn run_manifest(
    config: Option<PathBuf>,
    dir: &Path,
    domain: &str,
    concurrency: Option<usize>,
    output: Option<PathBuf>,
) {
    let overrides = concurrency.map(|c| serde_json::json!({"fingerprint": {"concurrency": c}}));
    let config = load_config(config, overrides);
    let engine = FingerprintEngine::new(config.deploy.fingerprint.clone())
        .unwrap_or_else(|e| fail(e))
        .with_cancel(install_signal_handler());
    let manifest = engine.generate(dir, domain, None).unwrap_or_else(|e| fail(e));

    match output {
        Some(path) => {
            manifest.write_to_file(&path).unwrap_or_else(|e| fail(e));
            info!(path = %path.display(), files = manifest.total_files, "manifest written");
        }
        None => print_json(&manifest),
    }
}

fn run_provenance(config: Option<PathBuf>, dir: &Path, domain: &str, format: Option<String>) {
    let config = load_config(config, None);
    let format = match format.as_deref() {
        None => config.deploy.provenance.format,
        Some("legacy") => ProvenanceFormat::Legacy,
        Some("v1_1") | Some("v1.1") => ProvenanceFormat::V11,
        Some(other) => fail(format!("unknown provenance format '{}'", other)),
    };
    let context = build_context();
    let manifest = FingerprintEngine::new(config.deploy.fingerprint.clone())
        .and_then(|engine| engine.generate(dir, domain, None))
        .unwrap_or_else(|e| fail(e));
    let document = build_provenance(&manifest, &context, format);
    print_json(&document);
}

fn run_validate(
    config: Option<PathBuf>,
    file: &Path,
    manifest: Option<PathBuf>,
    strict: bool,
    allow_deprecated: bool,
) {
    let config = load_config(config, None);
    let mut options = config.deploy.provenance.validation_options();
    options.strict_mode |= strict;
    options.allow_deprecated |= allow_deprecated;

    let raw = std::fs::read_to_string(file).unwrap_or_else(|e| fail(format!("{}: {}", file.display(), e)));
    let document: serde_json::Value = serde_json::from_str(&raw).unwrap_or_else(|e| fail(e));

    let validator = ProvenanceValidator::new(options);
    let result = match manifest {
        Some(path) => {
            let manifest = site_attest::FileManifest::from_file(&path).unwrap_or_else(|e| fail(e));
            validator.validate_against_manifest(&document, &manifest)
        }
        None => validator.validate(&document),
    };
    eprintln!("{}", ProvenanceValidator::summary(&result));
    print_json(&result);
    if !result.is_valid {
        process::exit(1);
    }
}

fn run_quilt(
    config: Option<PathBuf>,
    dir: Option<PathBuf>,
    domain: Option<String>,
    verify: Option<PathBuf>,
) {
    let config = load_config(config, None);
    let max_size = config.deploy.quilt.max_size_bytes;

    if let Some(path) = verify {
        let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| fail(format!("{}: {}", path.display(), e)));
        let quilt: serde_json::Value = serde_json::from_str(&raw).unwrap_or_else(|e| fail(e));
        match validate_quilt(&quilt, max_size) {
            Ok(kind) => println!("{} quilt valid: {}", kind.as_str(), path.display()),
            Err(e) => fail(e),
        }
        return;
    }

    let (Some(dir), Some(domain)) = (dir, domain) else {
        fail("quilt needs a build directory and --domain, or --verify <file>");
    };
    let context = build_context();
    let manifest = FingerprintEngine::new(config.deploy.fingerprint.clone())
        .and_then(|engine| engine.generate(&dir, &domain, None))
        .unwrap_or_else(|e| fail(e));
    let metadata = DeploymentMetadata {
        build_timestamp: context.build_finished_on.clone(),
        github_repo: context.repository.clone(),
        commit_sha: context.sha.clone(),
        workflow_ref: context.workflow_ref.clone().unwrap_or_default(),
        deployment_target: config.deploy.deployment_target.clone(),
    };
    let quilt = build_manifest_quilt(&domain, &manifest, metadata).unwrap_or_else(|e| fail(e));
    print_json(&quilt);
}

fn run_config(config: Option<PathBuf>) {
    let config = load_config(config, None);
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn endpoint_overrides(
    backend: Option<String>,
    endpoint: Option<String>,
    network: Option<String>,
) -> Option<serde_json::Value> {
    let mut overrides = serde_json::Map::new();
    let mut backend_section = serde_json::Map::new();
    if let Some(kind) = backend {
        backend_section.insert("kind".to_string(), kind.into());
    }
    if let Some(endpoint) = endpoint {
        backend_section.insert("endpoint".to_string(), endpoint.into());
    }
    if !backend_section.is_empty() {
        overrides.insert("backend".to_string(), backend_section.into());
    }
    if let Some(network) = network {
        network
            .parse::<Network>()
            .unwrap_or_else(|e| fail(e));
        overrides.insert("network".to_string(), network.into());
    }
    (!overrides.is_empty()).then_some(serde_json::Value::Object(overrides))
}

fn signer_from_env() -> Option<Ed25519Signer> {
    let secret = std::env::var(SIGNING_KEY_VAR).ok()?;
    Some(Ed25519Signer::from_secret(secret.trim()).unwrap_or_else(|e| fail(format!("{}: {}", SIGNING_KEY_VAR, e))))
}

fn run_deploy(
    config: Option<PathBuf>,
    dir: &Path,
    domain: &str,
    backend: Option<String>,
    endpoint: Option<String>,
    network: Option<String>,
    signature: Option<String>,
) {
    let config = load_config(config, endpoint_overrides(backend, endpoint, network));
    let deploy = &config.deploy;
    let cancel = install_signal_handler();
    let context = build_context();

    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(deploy.http_config()).unwrap_or_else(|e| fail(e)));
    let signer = signer_from_env();
    let signature = match (signature, &signer) {
        (Some(signature), _) => signature,
        (None, Some(signer)) => signer.sign_domain(domain),
        (None, None) => fail(format!("a domain signature needs --signature or {}", SIGNING_KEY_VAR)),
    };

    let backend: Arc<dyn AttestationBackend> = match deploy.backend.kind {
        BackendKind::Tee => {
            let Some(signer) = signer else {
                fail(format!("the tee backend needs {}", SIGNING_KEY_VAR));
            };
            Arc::new(
                TeeClient::new(transport, Arc::new(signer), deploy.retry_policy(), deploy.tee_config())
                    .with_cancel(cancel.clone()),
            )
        }
        BackendKind::Oidc => {
            let token = std::env::var(OIDC_TOKEN_VAR)
                .unwrap_or_else(|_| fail(format!("the oidc backend needs {}", OIDC_TOKEN_VAR)));
            let source = StaticTokenSource::new(token, deploy.backend.expected_issuer.clone());
            Arc::new(
                OidcClient::new(transport, Arc::new(source), deploy.retry_policy(), deploy.oidc_config())
                    .with_cancel(cancel.clone()),
            )
        }
    };

    let pipeline = DeploymentPipeline::new(backend, deploy.pipeline_options()).with_cancel(cancel);
    let outcome = runtime().block_on(pipeline.run(dir, &context, domain, &signature));
    match outcome {
        Ok(result) => print_json(&result),
        Err(failure) => {
            error!(stage = %failure.stage, retries = failure.retries, "{}", failure.error);
            for finding in &failure.findings {
                eprintln!("  - {}", finding);
            }
            print_json(&failure);
            process::exit(failure.exit_code());
        }
    }
}

fn run_status(config: Option<PathBuf>, request_id: &str, wait: bool, endpoint: Option<String>) {
    let config = load_config(config, endpoint_overrides(None, endpoint, None));
    let deploy = &config.deploy;
    let cancel = install_signal_handler();

    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(deploy.http_config()).unwrap_or_else(|e| fail(e)));
    let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
    let repository = std::env::var("GITHUB_REPOSITORY").unwrap_or_default();
    let client = DeploymentClient::new(transport, deploy.retry_policy(), client_info(run_id, repository))
        .with_cancel(cancel)
        .with_max_quilt_size(deploy.quilt.max_size_bytes);

    let rt = runtime();
    let status = if wait {
        rt.block_on(client.poll_until_complete(request_id, DEFAULT_POLL_INTERVAL, DEFAULT_MAX_WAIT))
    } else {
        rt.block_on(client.get_status(request_id))
    };
    match status {
        Ok(status) => print_json(&status),
        Err(e) if e.kind == site_attest::ErrorKind::Cancelled => {
            eprintln!("Cancelled");
            process::exit(EXIT_CODE_CANCELLED);
        }
        Err(e) => fail(e),
    }
}
