//! Provenance validation
//!
//! Three passes run in order over a JSON value and aggregate into one
//! [`ValidationResult`]:
//! - schema: required top-level fields, accepted type URIs, subject digests
//! - structural: nested predicate sections, strict timestamps
//! - semantic: dependency digests, GitHub naming, builder trust, completeness
//!
//! Severity only ever rises. A missing required field is `high`; a malformed
//! required timestamp or a broken subject cross-reference is `critical` and
//! always invalidates the document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::statement::{
    ProvenanceDocument, PREDICATE_TYPE_SLSA_V01, PREDICATE_TYPE_SLSA_V02, PREDICATE_TYPE_SLSA_V1,
    STATEMENT_TYPE_V01, STATEMENT_TYPE_V1,
};
use super::timestamp::parse_strict;
use crate::fingerprint::FileManifest;

/// Accepted statement types
pub const ACCEPTED_STATEMENT_TYPES: &[&str] = &[STATEMENT_TYPE_V01, STATEMENT_TYPE_V1];

/// Accepted predicate types
pub const ACCEPTED_PREDICATE_TYPES: &[&str] = &[PREDICATE_TYPE_SLSA_V02, PREDICATE_TYPE_SLSA_V1];

/// Predicate types accepted only with `allow_deprecated`
pub const DEPRECATED_PREDICATE_TYPES: &[&str] = &[PREDICATE_TYPE_SLSA_V01];

const REQUIRED_FIELDS: &[&str] = &["_type", "predicateType", "subject", "predicate"];

/// Builder identities that never identify a real build platform
const UNTRUSTED_BUILDER_IDS: &[&str] = &["", "unknown", "placeholder", "localhost", "test"];

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationOptions {
    /// Promote GitHub naming warnings to errors
    pub strict_mode: bool,
    /// Accept deprecated predicate types with a warning
    pub allow_deprecated: bool,
    /// Check timestamp grammar and ordering
    pub validate_timestamps: bool,
    /// Extra dotted paths that must be present (`predicate.metadata.buildInvocationId`)
    pub require_optional_fields: Vec<String>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            allow_deprecated: false,
            validate_timestamps: true,
            require_optional_fields: Vec::new(),
        }
    }
}

/// Outcome of validating one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub severity: Severity,
}

impl ValidationResult {
    /// Errors first, then warnings
    pub fn findings(&self) -> impl Iterator<Item = &str> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(String::as_str)
    }
}

/// Accumulates findings across passes
#[derive(Debug, Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
    severity: Severity,
}

impl Report {
    fn escalate(&mut self, severity: Severity) {
        self.severity = self.severity.max(severity);
    }

    fn error(&mut self, severity: Severity, message: impl Into<String>) {
        self.errors.push(message.into());
        self.escalate(severity);
    }

    fn warning(&mut self, severity: Severity, message: impl Into<String>) {
        self.warnings.push(message.into());
        self.escalate(severity);
    }

    fn missing(&mut self, path: &str) {
        self.error(Severity::High, format!("Missing required field: {path}"));
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            severity: self.severity,
        }
    }
}

/// Resolve a dotted path; numeric segments index arrays
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_hex_of_len(value: &str, len: Option<usize>) -> bool {
    !value.is_empty()
        && len.map_or(true, |l| value.len() == l)
        && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Expected hex length for a digest algorithm
fn digest_len(algorithm: &str) -> Option<usize> {
    match algorithm {
        "sha1" => Some(40),
        "sha256" => Some(64),
        "sha512" => Some(128),
        _ => None,
    }
}

fn is_owner_name(value: &str) -> bool {
    match value.split_once('/') {
        Some((owner, name)) => {
            let ok = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            };
            ok(owner) && ok(name)
        }
        None => false,
    }
}

/// Which predicate shape the document declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Legacy,
    V11,
}

/// Provenance validator
#[derive(Debug, Clone, Default)]
pub struct ProvenanceValidator {
    options: ValidationOptions,
}

impl ProvenanceValidator {
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Validate a provenance document given as JSON
    pub fn validate(&self, document: &Value) -> ValidationResult {
        let mut report = Report::default();
        let shape = self.schema_pass(document, &mut report);
        self.optional_fields_pass(document, &mut report);
        let Some(shape) = shape else {
            return report.finish();
        };
        self.structural_pass(document, shape, &mut report);
        self.semantic_pass(document, shape, &mut report);
        report.finish()
    }

    fn optional_fields_pass(&self, document: &Value, report: &mut Report) {
        for path in &self.options.require_optional_fields {
            if lookup(document, path).map_or(true, Value::is_null) {
                report.error(
                    Severity::High,
                    format!("Missing required optional field: {path}"),
                );
            }
        }
    }

    /// Validate a typed document
    pub fn validate_document(&self, document: &ProvenanceDocument) -> ValidationResult {
        match document.to_value() {
            Ok(value) => self.validate(&value),
            Err(e) => {
                let mut report = Report::default();
                report.error(Severity::Critical, format!("Provenance is not serializable: {e}"));
                report.finish()
            }
        }
    }

    /// Validate and cross-reference subjects against `manifest`
    pub fn validate_against_manifest(
        &self,
        document: &Value,
        manifest: &FileManifest,
    ) -> ValidationResult {
        let mut result = self.validate(document);
        let Some(subjects) = document.get("subject").and_then(Value::as_array) else {
            return result;
        };

        let mut errors = Vec::new();
        let mut declared: BTreeMap<&str, &str> = BTreeMap::new();
        for subject in subjects {
            let name = subject.get("name").and_then(Value::as_str).unwrap_or_default();
            let digest = lookup(subject, "digest.sha256")
                .and_then(Value::as_str)
                .unwrap_or_default();
            declared.insert(name, digest);
            match manifest.hash_for(name) {
                None => errors.push(format!("Subject {name} is not in the manifest")),
                Some(hash) if hash != digest => {
                    errors.push(format!("Subject digest mismatch for {name}"))
                }
                Some(_) => {}
            }
        }
        for entry in &manifest.files {
            if !declared.contains_key(entry.path.as_str()) {
                errors.push(format!("Manifest file {} has no subject", entry.path));
            }
        }

        if !errors.is_empty() {
            result.errors.extend(errors);
            result.severity = Severity::Critical;
            result.is_valid = false;
        }
        result
    }

    fn schema_pass(&self, document: &Value, report: &mut Report) -> Option<Shape> {
        let Some(object) = document.as_object() else {
            report.error(Severity::High, "Provenance must be a JSON object");
            return None;
        };
        for field in REQUIRED_FIELDS {
            if object.get(*field).map_or(true, Value::is_null) {
                report.missing(field);
            }
        }

        if let Some(value) = object.get("_type") {
            match value.as_str() {
                Some(t) if ACCEPTED_STATEMENT_TYPES.contains(&t) => {}
                Some(t) => report.error(Severity::Medium, format!("Invalid _type: {t}")),
                None => report.error(Severity::Medium, "_type must be a string"),
            }
        }

        let mut shape = Shape::Legacy;
        if let Some(value) = object.get("predicateType") {
            match value.as_str() {
                Some(t) if t == PREDICATE_TYPE_SLSA_V1 => shape = Shape::V11,
                Some(t) if ACCEPTED_PREDICATE_TYPES.contains(&t) => {}
                Some(t) if DEPRECATED_PREDICATE_TYPES.contains(&t) => {
                    if self.options.allow_deprecated {
                        report.warning(Severity::Low, format!("Deprecated predicateType: {t}"));
                    } else {
                        report.error(Severity::Medium, format!("Deprecated predicateType: {t}"));
                    }
                }
                Some(t) => report.error(Severity::Medium, format!("Invalid predicateType: {t}")),
                None => report.error(Severity::Medium, "predicateType must be a string"),
            }
        }

        if let Some(value) = object.get("subject") {
            match value.as_array() {
                Some(subjects) if subjects.is_empty() => {
                    report.error(Severity::High, "subject must be a non-empty array")
                }
                Some(subjects) => self.check_subjects(subjects, report),
                None if value.is_null() => {}
                None => report.error(Severity::High, "subject must be a non-empty array"),
            }
        }

        match object.get("predicate") {
            Some(Value::Object(_)) => Some(shape),
            Some(Value::Null) | None => None,
            Some(_) => {
                report.error(Severity::High, "predicate must be an object");
                None
            }
        }
    }

    fn check_subjects(&self, subjects: &[Value], report: &mut Report) {
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (i, subject) in subjects.iter().enumerate() {
            let name = subject.get("name").and_then(Value::as_str);
            let label = name.map_or_else(|| format!("subject[{i}]"), String::from);
            match name {
                Some(n) if !n.is_empty() => {}
                _ => report.error(Severity::Medium, format!("{label} has no name")),
            }
            let Some(sha256) = lookup(subject, "digest.sha256").and_then(Value::as_str) else {
                report.missing(&format!("subject[{i}].digest.sha256"));
                continue;
            };
            if !is_hex_of_len(sha256, Some(64)) {
                report.error(
                    Severity::Medium,
                    format!("Invalid sha256 digest for {label}"),
                );
            }
            if let Some(n) = name {
                if let Some(previous) = seen.insert(n, sha256) {
                    if previous != sha256 {
                        report.error(
                            Severity::Critical,
                            format!("Conflicting digests for subject {n}"),
                        );
                    }
                }
            }
        }
    }

    fn structural_pass(&self, document: &Value, shape: Shape, report: &mut Report) {
        match shape {
            Shape::Legacy => self.legacy_structure(document, report),
            Shape::V11 => self.v11_structure(document, report),
        }
    }

    fn require<'a>(&self, document: &'a Value, path: &str, report: &mut Report) -> Option<&'a Value> {
        let value = lookup(document, path).filter(|v| !v.is_null());
        if value.is_none() {
            report.missing(path);
        }
        value
    }

    fn legacy_structure(&self, document: &Value, report: &mut Report) {
        for path in [
            "predicate.builder.id",
            "predicate.buildType",
            "predicate.invocation.configSource.uri",
            "predicate.invocation.configSource.digest.sha1",
            "predicate.metadata.completeness",
            "predicate.metadata.reproducible",
            "predicate.materials",
        ] {
            self.require(document, path, report);
        }

        if let Some(completeness) = lookup(document, "predicate.metadata.completeness") {
            for flag in ["parameters", "environment", "materials"] {
                if !completeness.get(flag).map_or(false, Value::is_boolean) {
                    report.missing(&format!("predicate.metadata.completeness.{flag}"));
                }
            }
        }

        if let Some(materials) = lookup(document, "predicate.materials") {
            match materials.as_array() {
                Some(items) => {
                    for (i, material) in items.iter().enumerate() {
                        if material.get("uri").and_then(Value::as_str).is_none()
                            || !material.get("digest").map_or(false, Value::is_object)
                        {
                            report.error(
                                Severity::Medium,
                                format!("predicate.materials[{i}] needs uri and digest"),
                            );
                        }
                    }
                }
                None => report.error(Severity::Medium, "predicate.materials must be an array"),
            }
        }

        let started = self.require(document, "predicate.metadata.buildStartedOn", report);
        let finished = self.require(document, "predicate.metadata.buildFinishedOn", report);
        self.check_timestamps(
            ("predicate.metadata.buildStartedOn", started),
            ("predicate.metadata.buildFinishedOn", finished),
            Severity::Critical,
            report,
        );
    }

    fn v11_structure(&self, document: &Value, report: &mut Report) {
        for path in [
            "predicate.buildDefinition.buildType",
            "predicate.buildDefinition.externalParameters",
            "predicate.runDetails.builder.id",
        ] {
            self.require(document, path, report);
        }

        if let Some(deps) = lookup(document, "predicate.buildDefinition.resolvedDependencies") {
            match deps.as_array() {
                Some(items) => {
                    for (i, dep) in items.iter().enumerate() {
                        let has_locator = dep.get("uri").and_then(Value::as_str).is_some()
                            || dep.get("name").and_then(Value::as_str).is_some();
                        if !has_locator {
                            report.error(
                                Severity::Medium,
                                format!("resolvedDependencies[{i}] needs uri or name"),
                            );
                        }
                    }
                }
                None => report.error(
                    Severity::Medium,
                    "predicate.buildDefinition.resolvedDependencies must be an array",
                ),
            }
        }

        let started = lookup(document, "predicate.runDetails.metadata.startedOn");
        let finished = lookup(document, "predicate.runDetails.metadata.finishedOn");
        self.check_timestamps(
            ("predicate.runDetails.metadata.startedOn", started),
            ("predicate.runDetails.metadata.finishedOn", finished),
            Severity::Medium,
            report,
        );
    }

    /// Grammar and ordering. `malformed` is the severity for a bad grammar.
    fn check_timestamps(
        &self,
        started: (&str, Option<&Value>),
        finished: (&str, Option<&Value>),
        malformed: Severity,
        report: &mut Report,
    ) {
        if !self.options.validate_timestamps {
            return;
        }
        let mut parsed = Vec::with_capacity(2);
        for (path, value) in [started, finished] {
            let Some(value) = value.filter(|v| !v.is_null()) else {
                parsed.push(None);
                continue;
            };
            match value.as_str().and_then(parse_strict) {
                Some(ts) => parsed.push(Some(ts)),
                None => {
                    report.error(malformed, format!("Malformed timestamp in {path}"));
                    parsed.push(None);
                }
            }
        }
        if let [Some(start), Some(end)] = parsed.as_slice() {
            if start > end {
                report.error(
                    Severity::Critical,
                    format!("{} is after {}", started.0, finished.0),
                );
            }
        }
    }

    fn semantic_pass(&self, document: &Value, shape: Shape, report: &mut Report) {
        let (deps_path, builder_path) = match shape {
            Shape::Legacy => ("predicate.materials", "predicate.builder.id"),
            Shape::V11 => (
                "predicate.buildDefinition.resolvedDependencies",
                "predicate.runDetails.builder.id",
            ),
        };

        if let Some(items) = lookup(document, deps_path).and_then(Value::as_array) {
            for (i, item) in items.iter().enumerate() {
                let Some(digest) = item.get("digest").and_then(Value::as_object) else {
                    continue;
                };
                for (algorithm, value) in digest {
                    let ok = value
                        .as_str()
                        .map_or(false, |v| is_hex_of_len(v, digest_len(algorithm)));
                    if !ok {
                        report.error(
                            Severity::Medium,
                            format!("Malformed {algorithm} digest in {deps_path}[{i}]"),
                        );
                    }
                }
            }
        }

        let builder_id = lookup(document, builder_path).and_then(Value::as_str);
        if let Some(id) = builder_id {
            self.security_semantics(document, shape, id, report);
        }

        let github_build = builder_id.map_or(false, |id| id.contains("github"))
            || lookup(document, "predicate.invocation.configSource.uri")
                .and_then(Value::as_str)
                .map_or(false, |uri| uri.contains("github.com"));
        if github_build {
            self.github_semantics(document, shape, report);
        }
    }

    fn security_semantics(&self, document: &Value, shape: Shape, builder_id: &str, report: &mut Report) {
        let normalized = builder_id.trim().to_ascii_lowercase();
        if UNTRUSTED_BUILDER_IDS.contains(&normalized.as_str()) {
            report.error(
                Severity::Medium,
                format!("Untrusted builder identity: '{builder_id}'"),
            );
        } else if !normalized.starts_with("https://") {
            report.warning(
                Severity::Medium,
                format!("Builder identity is not an https URI: {builder_id}"),
            );
        }

        if shape == Shape::Legacy {
            let claims_materials = lookup(document, "predicate.metadata.completeness.materials")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let materials_empty = lookup(document, "predicate.materials")
                .and_then(Value::as_array)
                .map_or(true, Vec::is_empty);
            if claims_materials && materials_empty {
                report.error(
                    Severity::Medium,
                    "completeness.materials is true but no materials are declared",
                );
            }
        }
    }

    fn github_semantics(&self, document: &Value, shape: Shape, report: &mut Report) {
        let mut findings = Vec::new();
        match shape {
            Shape::Legacy => {
                if let Some(uri) = lookup(document, "predicate.invocation.configSource.uri")
                    .and_then(Value::as_str)
                {
                    let repo = uri
                        .strip_prefix("git+")
                        .and_then(|u| u.split_once("://").map(|(_, rest)| rest))
                        .and_then(|rest| rest.split_once('/').map(|(_, path)| path))
                        .map(|path| path.split('@').next().unwrap_or(path));
                    if !repo.map_or(false, is_owner_name) {
                        findings.push(format!(
                            "configSource.uri does not name a GitHub repository: {uri}"
                        ));
                    }
                }
                if let Some(entry) = lookup(document, "predicate.invocation.configSource.entryPoint")
                    .and_then(Value::as_str)
                {
                    if !entry.starts_with(".github/workflows/") {
                        findings.push(format!(
                            "entryPoint is not a workflow file under .github/workflows/: {entry}"
                        ));
                    }
                }
                if let Some(repo) = lookup(document, "predicate.invocation.environment.github_repository")
                    .and_then(Value::as_str)
                {
                    if !is_owner_name(repo) {
                        findings.push(format!("github_repository is not owner/name: {repo}"));
                    }
                }
            }
            Shape::V11 => {
                if let Some(path) = lookup(document, "predicate.buildDefinition.externalParameters.workflow.path")
                    .and_then(Value::as_str)
                {
                    if !path.starts_with(".github/workflows/") {
                        findings.push(format!(
                            "workflow.path is not under .github/workflows/: {path}"
                        ));
                    }
                }
            }
        }

        for finding in findings {
            if self.options.strict_mode {
                report.error(Severity::Medium, finding);
            } else {
                report.warning(Severity::Medium, finding);
            }
        }
    }

    /// Human-readable summary
    pub fn summary(result: &ValidationResult) -> String {
        let mut out = format!(
            "{} (severity: {}, {} errors, {} warnings)",
            if result.is_valid { "VALID" } else { "INVALID" },
            result.severity,
            result.errors.len(),
            result.warnings.len()
        );
        for error in &result.errors {
            out.push_str("\n  error: ");
            out.push_str(error);
        }
        for warning in &result.warnings {
            out.push_str("\n  warning: ");
            out.push_str(warning);
        }
        out
    }
}

/// Validate with default options
pub fn validate(document: &Value) -> ValidationResult {
    ProvenanceValidator::default().validate(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy() -> Value {
        json!({
            "_type": STATEMENT_TYPE_V01,
            "predicateType": PREDICATE_TYPE_SLSA_V02,
            "subject": [
                {"name": "index.html", "digest": {"sha256": "a".repeat(64)}},
                {"name": "app.js", "digest": {"sha256": "b".repeat(64)}}
            ],
            "predicate": {
                "builder": {"id": "https://github.com/actions/runner/github-hosted"},
                "buildType": "https://github.com/slsa-framework/slsa-github-generator/generic@v1",
                "invocation": {
                    "configSource": {
                        "uri": "git+https://github.com/acme/site@refs/heads/main",
                        "digest": {"sha1": "0".repeat(40)},
                        "entryPoint": ".github/workflows/deploy.yml"
                    },
                    "environment": {"github_repository": "acme/site"}
                },
                "metadata": {
                    "buildStartedOn": "2024-01-15T10:00:00Z",
                    "buildFinishedOn": "2024-01-15T10:05:00Z",
                    "completeness": {"parameters": true, "environment": false, "materials": false},
                    "reproducible": false
                },
                "materials": [
                    {"uri": "git+https://github.com/acme/site@refs/heads/main", "digest": {"sha1": "0".repeat(40)}}
                ]
            }
        })
    }

    fn set(doc: &mut Value, path: &str, value: Value) {
        let (parent, key) = path.rsplit_once('.').unwrap_or(("", path));
        let target = if parent.is_empty() {
            doc
        } else {
            parent.split('.').fold(doc, |v, seg| &mut v[seg])
        };
        target[key] = value;
    }

    fn remove(doc: &mut Value, path: &str) {
        let (parent, key) = path.rsplit_once('.').unwrap_or(("", path));
        let target = if parent.is_empty() {
            doc
        } else {
            parent.split('.').fold(doc, |v, seg| &mut v[seg])
        };
        target.as_object_mut().unwrap().remove(key);
    }

    #[test]
    fn test_valid_legacy_document() {
        let result = validate(&legacy());
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.severity, Severity::Low);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_predicate_type_is_high() {
        let mut doc = legacy();
        remove(&mut doc, "predicateType");
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::High);
        assert!(result.errors.iter().any(|e| e.contains("Missing required field: predicateType")));
    }

    #[test]
    fn test_malformed_required_timestamp_is_critical() {
        let mut doc = legacy();
        set(&mut doc, "predicate.metadata.buildStartedOn", json!("2024-01-15 10:00:00"));
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_misordered_timestamps_are_critical() {
        let mut doc = legacy();
        set(&mut doc, "predicate.metadata.buildStartedOn", json!("2024-01-15T11:00:00Z"));
        let result = validate(&doc);
        assert_eq!(result.severity, Severity::Critical);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_timestamp_checks_can_be_disabled() {
        let mut doc = legacy();
        set(&mut doc, "predicate.metadata.buildStartedOn", json!("yesterday"));
        let validator = ProvenanceValidator::new(ValidationOptions {
            validate_timestamps: false,
            ..ValidationOptions::default()
        });
        assert!(validator.validate(&doc).is_valid);
    }

    #[test]
    fn test_deprecated_predicate_type() {
        let mut doc = legacy();
        set(&mut doc, "predicateType", json!(PREDICATE_TYPE_SLSA_V01));

        let strict = validate(&doc);
        assert!(!strict.is_valid);
        assert_eq!(strict.severity, Severity::Medium);

        let relaxed = ProvenanceValidator::new(ValidationOptions {
            allow_deprecated: true,
            ..ValidationOptions::default()
        })
        .validate(&doc);
        assert!(relaxed.is_valid);
        assert_eq!(relaxed.severity, Severity::Low);
        assert_eq!(relaxed.warnings.len(), 1);
    }

    #[test]
    fn test_allow_deprecated_never_hides_critical() {
        let mut doc = legacy();
        set(&mut doc, "predicateType", json!(PREDICATE_TYPE_SLSA_V01));
        set(&mut doc, "predicate.metadata.buildFinishedOn", json!("not-a-time"));
        let result = ProvenanceValidator::new(ValidationOptions {
            allow_deprecated: true,
            ..ValidationOptions::default()
        })
        .validate(&doc);
        assert_eq!(result.severity, Severity::Critical);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_unknown_types_rejected() {
        let mut doc = legacy();
        set(&mut doc, "_type", json!("https://example.com/Statement"));
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::Medium);
    }

    #[test]
    fn test_empty_subject_and_bad_digest() {
        let mut doc = legacy();
        set(&mut doc, "subject", json!([]));
        assert_eq!(validate(&doc).severity, Severity::High);

        let mut doc = legacy();
        set(&mut doc, "subject", json!([{"name": "a", "digest": {"sha256": "xyz"}}]));
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("Invalid sha256 digest for a")));
    }

    #[test]
    fn test_conflicting_subject_digests_are_critical() {
        let mut doc = legacy();
        set(
            &mut doc,
            "subject",
            json!([
                {"name": "a", "digest": {"sha256": "a".repeat(64)}},
                {"name": "a", "digest": {"sha256": "b".repeat(64)}}
            ]),
        );
        assert_eq!(validate(&doc).severity, Severity::Critical);
    }

    #[test]
    fn test_untrusted_builder() {
        let mut doc = legacy();
        set(&mut doc, "predicate.builder.id", json!("placeholder"));
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("Untrusted builder")));
    }

    #[test]
    fn test_completeness_cannot_mask_missing_materials() {
        let mut doc = legacy();
        set(&mut doc, "predicate.metadata.completeness.materials", json!(true));
        set(&mut doc, "predicate.materials", json!([]));
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::Medium);
    }

    #[test]
    fn test_malformed_material_digest() {
        let mut doc = legacy();
        set(&mut doc, "predicate.materials", json!([{"uri": "git+https://github.com/acme/site", "digest": {"sha1": "zz"}}]));
        let result = validate(&doc);
        assert!(result.errors.iter().any(|e| e.contains("Malformed sha1 digest")));
    }

    #[test]
    fn test_github_semantics_warn_or_fail_in_strict_mode() {
        let mut doc = legacy();
        set(&mut doc, "predicate.invocation.configSource.entryPoint", json!("deploy.yml"));

        let lenient = validate(&doc);
        assert!(lenient.is_valid);
        assert_eq!(lenient.severity, Severity::Medium);
        assert_eq!(lenient.warnings.len(), 1);

        let strict = ProvenanceValidator::new(ValidationOptions {
            strict_mode: true,
            ..ValidationOptions::default()
        })
        .validate(&doc);
        assert!(!strict.is_valid);
    }

    #[test]
    fn test_require_optional_fields() {
        let validator = ProvenanceValidator::new(ValidationOptions {
            require_optional_fields: vec!["predicate.metadata.buildInvocationId".to_string()],
            ..ValidationOptions::default()
        });
        let result = validator.validate(&legacy());
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::High);

        let mut doc = legacy();
        set(&mut doc, "predicate.metadata.buildInvocationId", json!("run-1"));
        assert!(validator.validate(&doc).is_valid);
    }

    #[test]
    fn test_require_optional_fields_without_predicate() {
        let validator = ProvenanceValidator::new(ValidationOptions {
            require_optional_fields: vec!["predicate.metadata.buildInvocationId".to_string()],
            ..ValidationOptions::default()
        });
        let mut doc = legacy();
        remove(&mut doc, "predicate");

        let result = validator.validate(&doc);
        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("predicate.metadata.buildInvocationId")));
    }

    #[test]
    fn test_idempotent() {
        let mut doc = legacy();
        remove(&mut doc, "predicate.buildType");
        let validator = ProvenanceValidator::default();
        assert_eq!(validator.validate(&doc), validator.validate(&doc));
    }

    #[test]
    fn test_not_an_object() {
        let result = validate(&json!([1, 2]));
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::High);
    }

    #[test]
    fn test_v11_document() {
        let doc = json!({
            "_type": STATEMENT_TYPE_V1,
            "predicateType": PREDICATE_TYPE_SLSA_V1,
            "subject": [{"name": "index.html", "digest": {"sha256": "a".repeat(64)}}],
            "predicate": {
                "buildDefinition": {
                    "buildType": "https://slsa-framework.github.io/github-actions-buildtypes/workflow/v1",
                    "externalParameters": {"workflow": {"path": ".github/workflows/deploy.yml"}},
                    "resolvedDependencies": [{"uri": "git+https://github.com/acme/site", "digest": {"gitCommit": "0".repeat(40)}}]
                },
                "runDetails": {
                    "builder": {"id": "https://github.com/actions/runner/github-hosted"},
                    "metadata": {"startedOn": "2024-01-15T10:00:00Z", "finishedOn": "2024-01-15T10:05:00Z"}
                }
            }
        });
        let result = validate(&doc);
        assert!(result.is_valid, "{:?}", result.errors);

        let mut broken = doc.clone();
        remove(&mut broken, "predicate.runDetails.builder.id");
        let result = validate(&broken);
        assert_eq!(result.severity, Severity::High);
    }

    #[test]
    fn test_cross_reference_against_manifest() {
        use crate::fingerprint::{FileEntry, GenerationMethod};
        let file = |path: &str, hash: String| FileEntry {
            path: path.to_string(),
            content_hash: hash,
            size_bytes: 1,
            content_type: "text/plain".to_string(),
            last_modified: 0,
            encoding: "utf-8".to_string(),
            blob_id: None,
        };
        let manifest = FileManifest::new(
            "example.com",
            vec![file("index.html", "a".repeat(64)), file("app.js", "c".repeat(64))],
            GenerationMethod::Sequential,
            None,
            Vec::new(),
        );

        let result = ProvenanceValidator::default().validate_against_manifest(&legacy(), &manifest);
        assert!(!result.is_valid);
        assert_eq!(result.severity, Severity::Critical);
        assert!(result.errors.iter().any(|e| e == "Subject digest mismatch for app.js"));
    }

    #[test]
    fn test_summary() {
        let mut doc = legacy();
        remove(&mut doc, "predicateType");
        let summary = ProvenanceValidator::summary(&validate(&doc));
        assert!(summary.starts_with("INVALID (severity: high, 1 errors, 0 warnings)"));
        assert!(summary.contains("error: Missing required field: predicateType"));
    }

    #[test]
    fn test_result_serializes_is_valid_camel_case() {
        let value = serde_json::to_value(validate(&legacy())).unwrap();
        assert_eq!(value["isValid"], true);
        assert_eq!(value["severity"], "low");
    }
}
