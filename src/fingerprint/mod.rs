//! Build-tree fingerprinting
//!
//! Walks a build directory, hashes every artifact, and produces an ordered
//! [`FileManifest`]:
//! - Ignore rules for VCS/OS/tooling noise plus custom globs
//! - Bounded worker pool with index-keyed merge
//! - Progress events through a caller-supplied sink
//! - Post-hoc integrity verification of a directory against a manifest

pub mod content_type;
pub mod engine;
pub mod exclude;
pub mod manifest;
pub mod progress;

pub use content_type::{content_type_for, encoding_for, DEFAULT_CONTENT_TYPE};
pub use engine::{
    fingerprint_file, generate_file_manifest, FingerprintConfig, FingerprintEngine,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILES,
};
pub use exclude::{ExcludeError, ExcludeRules, DEFAULT_IGNORED_NAMES};
pub use manifest::{
    hash_file, FileEntry, FileFailure, FileManifest, GenerationMethod, IntegrityError,
    ManifestError, PerformanceMetrics, MANIFEST_VERSION,
};
pub use progress::{ProgressEvent, ProgressSink};
