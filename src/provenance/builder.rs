//! Provenance construction from a manifest and build context
//!
//! Output is a pure function of its inputs: timestamps come verbatim from
//! [`BuildContext`] and every map is ordered, so the same manifest and
//! context always serialize to the same bytes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::statement::{
    BuildDefinition, BuildMetadata, Builder, Completeness, ConfigSource, DigestSet, Invocation,
    LegacyBuilder, Material, ProvenanceDocument, ProvenanceFormat, ResourceDescriptor,
    RunDetails, RunMetadata, SlsaPredicate, SlsaPredicateV11, SlsaProvenance, SlsaProvenanceV11,
    Statement, Subject, PREDICATE_TYPE_SLSA_V02, PREDICATE_TYPE_SLSA_V1, STATEMENT_TYPE_V01,
    STATEMENT_TYPE_V1,
};
use crate::fingerprint::FileManifest;

/// Builder identity for GitHub-hosted runners
pub const GITHUB_HOSTED_BUILDER_ID: &str = "https://github.com/actions/runner/github-hosted";

/// Build type recorded in legacy predicates
pub const LEGACY_BUILD_TYPE: &str = "https://github.com/slsa-framework/slsa-github-generator/generic@v1";

/// Build type recorded in v1.1 predicates
pub const V11_BUILD_TYPE: &str = "https://slsa-framework.github.io/github-actions-buildtypes/workflow/v1";

const DEFAULT_SERVER_URL: &str = "https://github.com";

/// Environment variables a GitHub Actions run must provide
pub const REQUIRED_ENV_VARS: &[&str] = &[
    "GITHUB_REPOSITORY",
    "GITHUB_SHA",
    "GITHUB_ACTOR",
    "GITHUB_WORKFLOW",
    "GITHUB_RUN_ID",
    "GITHUB_REF",
    "GITHUB_EVENT_NAME",
];

/// Errors building a context or a provenance document
#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Invalid {field}: {reason}")]
    InvalidContext { field: &'static str, reason: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("JCS canonicalization error: {0}")]
    JcsError(String),
}

/// Facts about the build run that produced the artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// `owner/name`
    pub repository: String,
    pub server_url: String,
    /// Commit SHA
    pub sha: String,
    pub actor: String,
    pub workflow: String,
    /// `owner/name/.github/workflows/x.yml@ref`, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub event_name: String,
    pub run_id: u64,
    pub run_attempt: u32,
    /// Recorded verbatim
    pub build_started_on: String,
    /// Recorded verbatim
    pub build_finished_on: String,
}

impl BuildContext {
    /// Map GitHub Actions variables onto a context.
    ///
    /// Reading the process environment is left to the caller.
    pub fn from_env_map(
        vars: &HashMap<String, String>,
        build_started_on: impl Into<String>,
        build_finished_on: impl Into<String>,
    ) -> Result<Self, ProvenanceError> {
        let missing = missing_env_vars(vars);
        if !missing.is_empty() {
            return Err(ProvenanceError::MissingVariables(
                missing.into_iter().map(String::from).collect(),
            ));
        }
        let get = |name: &str| vars.get(name).cloned().unwrap_or_default();

        let run_id: u64 = get("GITHUB_RUN_ID")
            .parse()
            .map_err(|e: std::num::ParseIntError| ProvenanceError::InvalidContext {
                field: "run_id",
                reason: e.to_string(),
            })?;
        let run_attempt: u32 = match vars.get("GITHUB_RUN_ATTEMPT") {
            Some(raw) => raw
                .parse()
                .map_err(|e: std::num::ParseIntError| ProvenanceError::InvalidContext {
                    field: "run_attempt",
                    reason: e.to_string(),
                })?,
            None => 1,
        };

        let context = Self {
            repository: get("GITHUB_REPOSITORY"),
            server_url: vars
                .get("GITHUB_SERVER_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            sha: get("GITHUB_SHA"),
            actor: get("GITHUB_ACTOR"),
            workflow: get("GITHUB_WORKFLOW"),
            workflow_ref: vars.get("GITHUB_WORKFLOW_REF").cloned(),
            git_ref: get("GITHUB_REF"),
            event_name: get("GITHUB_EVENT_NAME"),
            run_id,
            run_attempt,
            build_started_on: build_started_on.into(),
            build_finished_on: build_finished_on.into(),
        };
        context.check()?;
        Ok(context)
    }

    /// Structural checks on the identifying fields
    pub fn check(&self) -> Result<(), ProvenanceError> {
        if self.owner_and_name().is_none() {
            return Err(ProvenanceError::InvalidContext {
                field: "repository",
                reason: format!("expected owner/name, got '{}'", self.repository),
            });
        }
        if self.sha.is_empty() || !self.sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProvenanceError::InvalidContext {
                field: "sha",
                reason: "expected a hex commit id".to_string(),
            });
        }
        Ok(())
    }

    /// Split `owner/name`
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.repository.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }

    /// `git+<server>/<owner>/<name>`
    pub fn repository_uri(&self) -> String {
        format!(
            "git+{}/{}",
            self.server_url.trim_end_matches('/'),
            self.repository
        )
    }

    /// Repository URI pinned to the ref
    pub fn source_uri(&self) -> String {
        format!("{}@{}", self.repository_uri(), self.git_ref)
    }

    fn invocation_id(&self) -> String {
        format!(
            "{}/{}/actions/runs/{}/attempts/{}",
            self.server_url.trim_end_matches('/'),
            self.repository,
            self.run_id,
            self.run_attempt
        )
    }

    fn workflow_path(&self) -> String {
        self.workflow_ref
            .as_deref()
            .and_then(|r| r.split_once('/').map(|(_, rest)| rest))
            .and_then(|r| r.split_once('/').map(|(_, rest)| rest))
            .and_then(|r| r.split('@').next())
            .unwrap_or(self.workflow.as_str())
            .to_string()
    }
}

/// Required variables absent from `vars`
pub fn missing_env_vars(vars: &HashMap<String, String>) -> Vec<&'static str> {
    REQUIRED_ENV_VARS
        .iter()
        .copied()
        .filter(|name| vars.get(*name).map_or(true, |v| v.is_empty()))
        .collect()
}

fn subjects(manifest: &FileManifest) -> Vec<Subject> {
    manifest
        .files
        .iter()
        .map(|f| Subject {
            name: f.path.clone(),
            digest: DigestSet {
                sha256: f.content_hash.clone(),
                git_commit: None,
            },
        })
        .collect()
}

fn digest(algorithm: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(algorithm.to_string(), value.to_string())])
}

/// Build a legacy (v0.2) provenance statement
pub fn build_legacy(manifest: &FileManifest, ctx: &BuildContext) -> SlsaProvenance {
    Statement {
        statement_type: STATEMENT_TYPE_V01.to_string(),
        predicate_type: PREDICATE_TYPE_SLSA_V02.to_string(),
        subject: subjects(manifest),
        predicate: SlsaPredicate {
            builder: LegacyBuilder {
                id: GITHUB_HOSTED_BUILDER_ID.to_string(),
            },
            build_type: LEGACY_BUILD_TYPE.to_string(),
            invocation: Invocation {
                config_source: ConfigSource {
                    uri: ctx.source_uri(),
                    digest: digest("sha1", &ctx.sha),
                    entry_point: Some(ctx.workflow_path()),
                },
                parameters: Some(json!({
                    "domain": manifest.domain,
                    "event_name": ctx.event_name,
                })),
                environment: Some(json!({
                    "github_actor": ctx.actor,
                    "github_event_name": ctx.event_name,
                    "github_ref": ctx.git_ref,
                    "github_repository": ctx.repository,
                    "github_run_attempt": ctx.run_attempt.to_string(),
                    "github_run_id": ctx.run_id.to_string(),
                    "github_sha1": ctx.sha,
                })),
            },
            metadata: BuildMetadata {
                build_started_on: ctx.build_started_on.clone(),
                build_finished_on: ctx.build_finished_on.clone(),
                completeness: Completeness {
                    parameters: true,
                    environment: false,
                    materials: false,
                },
                reproducible: false,
                build_invocation_id: Some(ctx.invocation_id()),
            },
            materials: vec![Material {
                uri: ctx.source_uri(),
                digest: digest("sha1", &ctx.sha),
            }],
        },
    }
}

/// Build a v1.1 provenance statement
pub fn build_v11(manifest: &FileManifest, ctx: &BuildContext) -> SlsaProvenanceV11 {
    Statement {
        statement_type: STATEMENT_TYPE_V1.to_string(),
        predicate_type: PREDICATE_TYPE_SLSA_V1.to_string(),
        subject: subjects(manifest),
        predicate: SlsaPredicateV11 {
            build_definition: BuildDefinition {
                build_type: V11_BUILD_TYPE.to_string(),
                external_parameters: json!({
                    "workflow": {
                        "ref": ctx.git_ref,
                        "repository": format!("{}/{}", ctx.server_url.trim_end_matches('/'), ctx.repository),
                        "path": ctx.workflow_path(),
                    },
                    "domain": manifest.domain,
                }),
                internal_parameters: Some(json!({
                    "github": {
                        "actor": ctx.actor,
                        "event_name": ctx.event_name,
                    },
                })),
                resolved_dependencies: vec![ResourceDescriptor {
                    uri: ctx.source_uri(),
                    digest: digest("gitCommit", &ctx.sha),
                    name: None,
                    media_type: None,
                }],
            },
            run_details: RunDetails {
                builder: Builder {
                    id: GITHUB_HOSTED_BUILDER_ID.to_string(),
                    version: BTreeMap::new(),
                },
                metadata: Some(RunMetadata {
                    invocation_id: Some(ctx.invocation_id()),
                    started_on: Some(ctx.build_started_on.clone()),
                    finished_on: Some(ctx.build_finished_on.clone()),
                }),
                byproducts: Vec::new(),
            },
        },
    }
}

/// Build a provenance document in the requested shape
pub fn build_provenance(
    manifest: &FileManifest,
    ctx: &BuildContext,
    format: ProvenanceFormat,
) -> ProvenanceDocument {
    match format {
        ProvenanceFormat::Legacy => ProvenanceDocument::Legacy(build_legacy(manifest, ctx)),
        ProvenanceFormat::V11 => ProvenanceDocument::V11(build_v11(manifest, ctx)),
    }
}

/// SHA-256 over JCS(document)
pub fn provenance_fingerprint(doc: &ProvenanceDocument) -> Result<String, ProvenanceError> {
    let jcs_bytes =
        serde_json_canonicalizer::to_vec(doc).map_err(|e| ProvenanceError::JcsError(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&jcs_bytes);
    Ok(hex::encode(hasher.finalize()))
}
