//! SLSA provenance: construction and validation
//!
//! [`build_provenance`] turns a [`FileManifest`](crate::fingerprint::FileManifest)
//! and a [`BuildContext`] into an in-toto statement in either the legacy or
//! the v1.1 predicate shape. [`ProvenanceValidator`] grades any such
//! document, typed or raw JSON, before it is allowed near the network.

pub mod builder;
pub mod statement;
pub mod timestamp;
pub mod validator;

pub use builder::{
    build_legacy, build_provenance, build_v11, missing_env_vars, provenance_fingerprint,
    BuildContext, ProvenanceError, GITHUB_HOSTED_BUILDER_ID, LEGACY_BUILD_TYPE,
    REQUIRED_ENV_VARS, V11_BUILD_TYPE,
};
pub use statement::{
    DigestSet, ProvenanceDocument, ProvenanceFormat, SlsaProvenance, SlsaProvenanceV11, Statement,
    Subject, PREDICATE_TYPE_SLSA_V01, PREDICATE_TYPE_SLSA_V02, PREDICATE_TYPE_SLSA_V1,
    STATEMENT_TYPE_V01, STATEMENT_TYPE_V1,
};
pub use timestamp::{is_strict_iso8601, parse_strict};
pub use validator::{
    lookup, validate, ProvenanceValidator, Severity, ValidationOptions, ValidationResult,
};
