//! File manifest types
//!
//! A [`FileManifest`] is the ordered record of every build artifact with
//! its content hash. `manifest_hash` binds the file list via JCS so that
//! downstream bundles can reference the whole set by one digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::exclude::ExcludeError;

/// Schema version for manifests
pub const MANIFEST_VERSION: u32 = 1;

/// Read buffer used when hashing file contents
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// How a manifest was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMethod {
    /// One worker processed every chunk
    Sequential,
    /// Every chunk got a dedicated worker
    Parallel,
    /// Chunks outnumbered workers; workers pulled from a shared queue
    WorkerPool,
}

/// A single build artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Root-relative POSIX path
    pub path: String,

    /// SHA-256 of file contents (hex)
    pub content_hash: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// MIME type derived from the extension
    pub content_type: String,

    /// Last-modified time, milliseconds since the Unix epoch
    pub last_modified: u64,

    /// `utf-8` or `binary`
    pub encoding: String,

    /// Storage blob identifier once uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
}

/// A file that could not be fingerprinted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

/// Observational timings for one generation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub total_processing_time_ms: u64,
    pub file_discovery_time_ms: u64,
    pub hashing_time_ms: u64,
    pub concurrent_operations: usize,
    pub average_file_processing_time_ms: f64,
    pub files_per_second: f64,
}

impl PerformanceMetrics {
    /// Derive throughput figures from raw timings
    pub fn from_timings(
        discovery_ms: u64,
        hashing_ms: u64,
        total_ms: u64,
        concurrency: usize,
        files: usize,
    ) -> Self {
        let average = if files == 0 {
            0.0
        } else {
            hashing_ms as f64 / files as f64
        };
        let per_second = if total_ms == 0 {
            files as f64 * 1000.0
        } else {
            files as f64 * 1000.0 / total_ms as f64
        };
        Self {
            total_processing_time_ms: total_ms,
            file_discovery_time_ms: discovery_ms,
            hashing_time_ms: hashing_ms,
            concurrent_operations: concurrency,
            average_file_processing_time_ms: average,
            files_per_second: per_second,
        }
    }
}

/// Ordered manifest of a build tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifest {
    pub domain: String,

    /// Schema version
    pub version: u32,

    /// When the manifest was generated
    pub timestamp: DateTime<Utc>,

    pub total_files: usize,

    pub total_size_bytes: u64,

    /// Entries in discovery order
    pub files: Vec<FileEntry>,

    pub generation_method: GenerationMethod,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,

    /// Files skipped under the failure threshold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileFailure>,
}

/// Errors for manifest generation and verification
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Build directory does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("Build path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Too many files: found more than {limit}")]
    TooManyFiles { limit: usize },

    #[error("Failed to fingerprint {path}: {reason}")]
    FileFailed { path: String, reason: String },

    #[error("{count} files failed (threshold {threshold}); first: {first_path}: {first_reason}")]
    TooManyFailures {
        count: usize,
        threshold: usize,
        first_path: String,
        first_reason: String,
    },

    #[error("Manifest generation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("JCS canonicalization error: {0}")]
    JcsError(String),

    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Ignore rules: {0}")]
    Exclude(#[from] ExcludeError),

    #[error("Path is not within build root: {0}")]
    PathNotInRoot(String),
}

impl ManifestError {
    /// Path of the offending file, when the error is tied to one
    pub fn offending_path(&self) -> Option<&str> {
        match self {
            ManifestError::FileFailed { path, .. } => Some(path),
            ManifestError::TooManyFailures { first_path, .. } => Some(first_path),
            ManifestError::PathNotInRoot(path) => Some(path),
            _ => None,
        }
    }
}

/// Compute SHA-256 of a file's contents, streaming
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Convert a root-relative path to a POSIX string
pub fn to_posix(rel_path: &Path) -> String {
    rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl FileManifest {
    /// Assemble a manifest, deriving the aggregate counters from `files`
    pub fn new(
        domain: impl Into<String>,
        files: Vec<FileEntry>,
        generation_method: GenerationMethod,
        performance_metrics: Option<PerformanceMetrics>,
        errors: Vec<FileFailure>,
    ) -> Self {
        Self {
            domain: domain.into(),
            version: MANIFEST_VERSION,
            timestamp: Utc::now(),
            total_files: files.len(),
            total_size_bytes: files.iter().map(|f| f.size_bytes).sum(),
            files,
            generation_method,
            performance_metrics,
            errors,
        }
    }

    /// Whether the aggregate counters match the entries
    pub fn totals_consistent(&self) -> bool {
        self.total_files == self.files.len()
            && self.total_size_bytes == self.files.iter().map(|f| f.size_bytes).sum::<u64>()
    }

    /// SHA-256 of JCS(files), binding the artifact set
    pub fn compute_manifest_hash(files: &[FileEntry]) -> Result<String, ManifestError> {
        let files_vec: Vec<_> = files.to_vec();
        let jcs_bytes = serde_json_canonicalizer::to_vec(&files_vec)
            .map_err(|e| ManifestError::JcsError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// SHA-256 of JCS(self.files)
    pub fn manifest_hash(&self) -> Result<String, ManifestError> {
        Self::compute_manifest_hash(&self.files)
    }

    /// Content hash recorded for `path`
    pub fn hash_for(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content_hash.as_str())
    }

    /// Copy of this manifest with storage blob ids attached
    pub fn with_blob_ids(&self, mapping: &BTreeMap<String, String>) -> Self {
        let mut copy = self.clone();
        for entry in &mut copy.files {
            if let Some(blob_id) = mapping.get(&entry.path) {
                entry.blob_id = Some(blob_id.clone());
            }
        }
        copy
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> Result<(), ManifestError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Verify all entries against the files under `root`
    pub fn verify_entries(&self, root: &Path) -> Result<Vec<IntegrityError>, ManifestError> {
        let mut errors = Vec::new();

        for entry in &self.files {
            let full_path = root.join(&entry.path);

            if !full_path.is_file() {
                errors.push(IntegrityError::MissingFile {
                    path: entry.path.clone(),
                });
                continue;
            }

            let (actual_hash, actual_size) = hash_file(&full_path)?;
            if actual_size != entry.size_bytes {
                errors.push(IntegrityError::SizeMismatch {
                    path: entry.path.clone(),
                    expected: entry.size_bytes,
                    actual: actual_size,
                });
            }
            if actual_hash != entry.content_hash {
                errors.push(IntegrityError::HashMismatch {
                    path: entry.path.clone(),
                    expected: entry.content_hash.clone(),
                    actual: actual_hash,
                });
            }
        }

        Ok(errors)
    }

    /// Files under `root` that are not in the manifest
    pub fn find_extra_files(&self, root: &Path) -> Result<Vec<String>, ManifestError> {
        let manifest_paths: HashSet<&str> = self.files.iter().map(|e| e.path.as_str()).collect();
        let mut extra_files = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_path = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| ManifestError::PathNotInRoot(entry.path().display().to_string()))?;
            let rel = to_posix(rel_path);
            if !manifest_paths.contains(rel.as_str()) {
                extra_files.push(rel);
            }
        }

        Ok(extra_files)
    }
}

/// Integrity verification error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrityError {
    MissingFile { path: String },
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, content: &[u8]) -> FileEntry {
        let mut hasher = Sha256::new();
        hasher.update(content);
        FileEntry {
            path: path.to_string(),
            content_hash: hex::encode(hasher.finalize()),
            size_bytes: content.len() as u64,
            content_type: "text/plain".to_string(),
            last_modified: 0,
            encoding: "utf-8".to_string(),
            blob_id: None,
        }
    }

    #[test]
    fn test_new_derives_totals() {
        let manifest = FileManifest::new(
            "example.com",
            vec![entry("a.txt", b"hello"), entry("b.txt", b"0123456789"), entry("c.txt", b"")],
            GenerationMethod::Sequential,
            None,
            Vec::new(),
        );

        assert_eq!(manifest.total_files, 3);
        assert_eq!(manifest.total_size_bytes, 15);
        assert!(manifest.totals_consistent());
    }

    #[test]
    fn test_manifest_hash_deterministic_and_order_sensitive() {
        let files = vec![entry("a.txt", b"a"), entry("b.txt", b"b")];
        let h1 = FileManifest::compute_manifest_hash(&files).unwrap();
        let h2 = FileManifest::compute_manifest_hash(&files).unwrap();
        assert_eq!(h1, h2);

        let reversed: Vec<_> = files.iter().rev().cloned().collect();
        assert_ne!(h1, FileManifest::compute_manifest_hash(&reversed).unwrap());
    }

    #[test]
    fn test_hash_file_matches_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        let (hash, size) = hash_file(&path).unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_with_blob_ids_leaves_original_untouched() {
        let manifest = FileManifest::new(
            "example.com",
            vec![entry("a.txt", b"a")],
            GenerationMethod::Sequential,
            None,
            Vec::new(),
        );
        let mut mapping = BTreeMap::new();
        mapping.insert("a.txt".to_string(), "blob-1".to_string());

        let stored = manifest.with_blob_ids(&mapping);
        assert_eq!(stored.files[0].blob_id.as_deref(), Some("blob-1"));
        assert!(manifest.files[0].blob_id.is_none());
    }

    #[test]
    fn test_verify_entries_detects_modification_and_removal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("b.txt"), b"world").unwrap();
        let manifest = FileManifest::new(
            "example.com",
            vec![entry("a.txt", b"hello"), entry("b.txt", b"world")],
            GenerationMethod::Sequential,
            None,
            Vec::new(),
        );
        assert!(manifest.verify_entries(dir.path()).unwrap().is_empty());

        fs::write(dir.path().join("a.txt"), b"HELLO").unwrap();
        fs::remove_file(dir.path().join("b.txt")).unwrap();

        let errors = manifest.verify_entries(dir.path()).unwrap();
        assert!(errors
            .iter()
            .any(|e| matches!(e, IntegrityError::HashMismatch { path, .. } if path == "a.txt")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, IntegrityError::MissingFile { path } if path == "b.txt")));
    }

    #[test]
    fn test_find_extra_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/new.txt"), b"x").unwrap();
        let manifest = FileManifest::new(
            "example.com",
            vec![entry("a.txt", b"a")],
            GenerationMethod::Sequential,
            None,
            Vec::new(),
        );

        let extra = manifest.find_extra_files(dir.path()).unwrap();
        assert_eq!(extra, vec!["sub/new.txt".to_string()]);
    }

    #[test]
    fn test_json_file_round_trip_keeps_method_tag() {
        let dir = TempDir::new().unwrap();
        let manifest = FileManifest::new(
            "example.com",
            vec![entry("a.txt", b"a")],
            GenerationMethod::WorkerPool,
            None,
            Vec::new(),
        );
        let path = dir.path().join("manifest.json");
        manifest.write_to_file(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"generation_method\": \"worker-pool\""));
        assert!(!raw.contains("blob_id"));

        let loaded = FileManifest::from_file(&path).unwrap();
        assert_eq!(loaded.files, manifest.files);
        assert_eq!(loaded.generation_method, GenerationMethod::WorkerPool);
    }
}
