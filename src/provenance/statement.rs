//! in-toto statement and SLSA provenance predicate types
//!
//! Two predicate shapes are carried: the legacy v0.2 shape
//! (builder/buildType/invocation/metadata/materials) and the v1.1 shape
//! (buildDefinition/runDetails). They are not convertible into each other.
//!
//! See: <https://slsa.dev/spec/v0.2/provenance> and
//! <https://slsa.dev/spec/v1.1/provenance>

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// in-toto Statement v0.1 type URI
pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";
/// in-toto Statement v1 type URI
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// SLSA provenance v0.1 predicate type (deprecated)
pub const PREDICATE_TYPE_SLSA_V01: &str = "https://slsa.dev/provenance/v0.1";
/// SLSA provenance v0.2 predicate type
pub const PREDICATE_TYPE_SLSA_V02: &str = "https://slsa.dev/provenance/v0.2";
/// SLSA provenance v1 predicate type
pub const PREDICATE_TYPE_SLSA_V1: &str = "https://slsa.dev/provenance/v1";

/// A typed in-toto statement over predicate `P`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement<P> {
    #[serde(rename = "_type")]
    pub statement_type: String,
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    /// Output artifacts of the build
    pub subject: Vec<Subject>,
    pub predicate: P,
}

/// Legacy (v0.2) provenance statement
pub type SlsaProvenance = Statement<SlsaPredicate>;

/// v1.1 provenance statement
pub type SlsaProvenanceV11 = Statement<SlsaPredicateV11>;

/// An output artifact of the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Root-relative artifact path
    pub name: String,
    pub digest: DigestSet,
}

/// Subject digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSet {
    /// SHA-256 hex digest
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
}

/// Legacy predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlsaPredicate {
    pub builder: LegacyBuilder,
    pub build_type: String,
    pub invocation: Invocation,
    pub metadata: BuildMetadata,
    pub materials: Vec<Material>,
}

/// Legacy builder identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyBuilder {
    pub id: String,
}

/// What triggered the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub config_source: ConfigSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Value>,
}

/// Where the build configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    pub uri: String,
    /// Commit digest keyed by algorithm (`sha1`)
    pub digest: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

/// Timing and completeness metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    pub build_started_on: String,
    pub build_finished_on: String,
    pub completeness: Completeness,
    pub reproducible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_invocation_id: Option<String>,
}

/// Which predicate sections are claimed complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completeness {
    pub parameters: bool,
    pub environment: bool,
    pub materials: bool,
}

/// A build input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub uri: String,
    pub digest: BTreeMap<String, String>,
}

/// v1.1 predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlsaPredicateV11 {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

/// Inputs that define the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    pub build_type: String,
    pub external_parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_dependencies: Vec<ResourceDescriptor>,
}

/// Reference to an artifact or dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub digest: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Details of the particular build run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    pub builder: Builder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RunMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub byproducts: Vec<ResourceDescriptor>,
}

/// v1.1 builder identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub version: BTreeMap<String, String>,
}

/// v1.1 run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<String>,
}

/// Predicate shape to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceFormat {
    /// builder/buildType/invocation/metadata/materials
    #[default]
    Legacy,
    /// buildDefinition/runDetails
    #[serde(rename = "v1_1")]
    V11,
}

/// A provenance document in either shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvenanceDocument {
    V11(SlsaProvenanceV11),
    Legacy(SlsaProvenance),
}

impl ProvenanceDocument {
    /// Shape of this document
    pub fn format(&self) -> ProvenanceFormat {
        match self {
            ProvenanceDocument::Legacy(_) => ProvenanceFormat::Legacy,
            ProvenanceDocument::V11(_) => ProvenanceFormat::V11,
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        match self {
            ProvenanceDocument::Legacy(s) => &s.subject,
            ProvenanceDocument::V11(s) => &s.subject,
        }
    }

    pub fn predicate_type(&self) -> &str {
        match self {
            ProvenanceDocument::Legacy(s) => &s.predicate_type,
            ProvenanceDocument::V11(s) => &s.predicate_type,
        }
    }

    /// JSON value of the document
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_document_picks_v11_shape() {
        let json = serde_json::json!({
            "_type": STATEMENT_TYPE_V1,
            "predicateType": PREDICATE_TYPE_SLSA_V1,
            "subject": [{"name": "index.html", "digest": {"sha256": "ab"}}],
            "predicate": {
                "buildDefinition": {"buildType": "t", "externalParameters": {}},
                "runDetails": {"builder": {"id": "b"}}
            }
        });
        let doc: ProvenanceDocument = serde_json::from_value(json).unwrap();
        assert_eq!(doc.format(), ProvenanceFormat::V11);
        assert_eq!(doc.subjects()[0].name, "index.html");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let digest = DigestSet {
            sha256: "ab".to_string(),
            git_commit: None,
        };
        let json = serde_json::to_value(&digest).unwrap();
        assert_eq!(json, serde_json::json!({"sha256": "ab"}));
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(serde_json::to_value(ProvenanceFormat::V11).unwrap(), "v1_1");
        assert_eq!(serde_json::to_value(ProvenanceFormat::Legacy).unwrap(), "legacy");
    }
}
