//! Concurrent build-tree fingerprinting
//!
//! Discovery walks the root in a stable order (children sorted by name,
//! symlinks not followed). The candidate list is cut into contiguous chunks
//! and a bounded pool of scoped worker threads pulls chunk indices from a
//! shared cursor. Results are slotted by chunk index, so the final order is
//! the discovery order no matter which worker finishes first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Instant, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::content_type::{content_type_for, encoding_for};
use super::exclude::ExcludeRules;
use super::manifest::{
    hash_file, to_posix, FileEntry, FileFailure, FileManifest, GenerationMethod, ManifestError,
    PerformanceMetrics,
};
use super::progress::{ProgressEvent, ProgressSink};
use crate::cancel::CancelToken;

/// Default ceiling on discovered files
pub const DEFAULT_MAX_FILES: usize = 10_000;

/// Default number of files per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Fingerprint engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Fail when discovery finds more files than this
    pub max_files: usize,
    /// Worker count (0 = available parallelism)
    pub concurrency: usize,
    /// Files per chunk
    pub chunk_size: usize,
    /// Extra ignore globs on top of the defaults
    pub ignore_patterns: Vec<String>,
    /// Per-file failures tolerated before the batch aborts (0 = fail fast)
    pub failure_threshold: usize,
    /// Emit progress events
    pub emit_progress: bool,
    /// Record timings in the manifest
    pub performance_metrics: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            concurrency: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            ignore_patterns: Vec::new(),
            failure_threshold: 0,
            emit_progress: true,
            performance_metrics: true,
        }
    }
}

impl FingerprintConfig {
    /// Effective worker count
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Output of one chunk
struct ChunkResult {
    index: usize,
    entries: Vec<FileEntry>,
    failures: Vec<FileFailure>,
}

/// Fingerprint engine
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    config: FingerprintConfig,
    rules: ExcludeRules,
    cancel: CancelToken,
}

impl FingerprintEngine {
    /// Create an engine, compiling the ignore patterns
    pub fn new(config: FingerprintConfig) -> Result<Self, ManifestError> {
        let rules = ExcludeRules::with_patterns(&config.ignore_patterns)?;
        Ok(Self {
            config,
            rules,
            cancel: CancelToken::new(),
        })
    }

    /// Observe `token`; workers stop picking up chunks once it fires
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Enumerate candidate files under `root` as POSIX relative paths
    pub fn discover(&self, root: &Path) -> Result<Vec<String>, ManifestError> {
        if !root.exists() {
            return Err(ManifestError::RootNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ManifestError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(root) {
                Ok(rel) if rel.as_os_str().is_empty() => true,
                Ok(rel) => !self.rules.is_excluded(rel),
                Err(_) => false,
            });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_path = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| ManifestError::PathNotInRoot(entry.path().display().to_string()))?;

            if files.len() == self.config.max_files {
                return Err(ManifestError::TooManyFiles {
                    limit: self.config.max_files,
                });
            }
            files.push(to_posix(rel_path));
        }

        Ok(files)
    }

    /// Fingerprint every file under `root` into a manifest for `domain`
    pub fn generate(
        &self,
        root: &Path,
        domain: &str,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<FileManifest, ManifestError> {
        let progress = if self.config.emit_progress { progress } else { None };
        let started = Instant::now();

        let files = match self.discover(root) {
            Ok(files) => files,
            Err(e) => {
                emit(progress, error_event(&e, 0));
                return Err(e);
            }
        };
        let discovery_ms = started.elapsed().as_millis() as u64;
        debug!(files = files.len(), discovery_ms, "discovery complete");
        emit(
            progress,
            ProgressEvent::Discovery {
                files_discovered: files.len(),
            },
        );

        let chunk_size = self.config.chunk_size.max(1);
        let chunks: Vec<&[String]> = files.chunks(chunk_size).collect();
        let workers = self
            .config
            .effective_concurrency()
            .min(chunks.len())
            .max(1);
        let method = if workers == 1 {
            GenerationMethod::Sequential
        } else if workers == chunks.len() {
            GenerationMethod::Parallel
        } else {
            GenerationMethod::WorkerPool
        };

        let hashing_started = Instant::now();
        let (entries, failures) = match self.process_chunks(root, &chunks, workers, files.len(), progress) {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "manifest generation failed");
                return Err(e);
            }
        };
        let hashing_ms = hashing_started.elapsed().as_millis() as u64;
        let total_ms = started.elapsed().as_millis() as u64;

        for failure in &failures {
            warn!(path = %failure.path, reason = %failure.reason, "skipped file under failure threshold");
        }

        let metrics = self.config.performance_metrics.then(|| {
            PerformanceMetrics::from_timings(discovery_ms, hashing_ms, total_ms, workers, entries.len())
        });
        let manifest = FileManifest::new(domain, entries, method, metrics, failures);

        info!(
            domain,
            files = manifest.total_files,
            bytes = manifest.total_size_bytes,
            workers,
            elapsed_ms = total_ms,
            "manifest generated"
        );
        emit(
            progress,
            ProgressEvent::Completed {
                total_files: manifest.total_files,
                total_size_bytes: manifest.total_size_bytes,
                elapsed_ms: total_ms,
            },
        );

        Ok(manifest)
    }

    fn process_chunks(
        &self,
        root: &Path,
        chunks: &[&[String]],
        workers: usize,
        total_files: usize,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<(Vec<FileEntry>, Vec<FileFailure>), ManifestError> {
        let cursor = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let mut slots: Vec<Option<Vec<FileEntry>>> = vec![None; chunks.len()];
        let mut failures: Vec<(usize, FileFailure)> = Vec::new();
        let mut processed = 0usize;
        let mut exceeded = false;

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<ChunkResult>();

            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                let abort = &abort;
                let cancel = &self.cancel;
                scope.spawn(move || loop {
                    if abort.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(chunk) = chunks.get(index) else {
                        break;
                    };
                    let result = fingerprint_chunk(root, index, chunk);
                    if tx.send(result).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for result in rx {
                processed += result.entries.len() + result.failures.len();
                let index = result.index;
                failures.extend(result.failures.into_iter().map(|f| (index, f)));

                if !exceeded && failures.len() > self.config.failure_threshold {
                    abort.store(true, Ordering::SeqCst);
                    exceeded = true;
                }

                if !exceeded {
                    emit(
                        progress,
                        ProgressEvent::Processing {
                            files_processed: processed,
                            total_files,
                            chunk_index: result.index,
                            percentage: ProgressEvent::percentage(processed, total_files),
                        },
                    );
                }
                slots[index] = Some(result.entries);
            }
        });

        let failures = in_discovery_order(failures);
        if let Some(error) = threshold_error(&failures, self.config.failure_threshold) {
            emit(progress, error_event(&error, processed));
            return Err(error);
        }
        if slots.iter().any(Option::is_none) {
            let error = ManifestError::Cancelled;
            emit(progress, error_event(&error, processed));
            return Err(error);
        }

        let entries = slots.into_iter().flatten().flatten().collect();
        Ok((entries, failures))
    }
}

/// Fingerprint one file
pub fn fingerprint_file(root: &Path, rel_path: &str) -> std::io::Result<FileEntry> {
    let full_path: PathBuf = root.join(rel_path);
    let metadata = std::fs::metadata(&full_path)?;
    let (content_hash, size_bytes) = hash_file(&full_path)?;
    let last_modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let content_type = content_type_for(&full_path);

    Ok(FileEntry {
        path: rel_path.to_string(),
        content_hash,
        size_bytes,
        content_type: content_type.to_string(),
        last_modified,
        encoding: encoding_for(content_type).to_string(),
        blob_id: None,
    })
}

fn fingerprint_chunk(root: &Path, index: usize, chunk: &[String]) -> ChunkResult {
    let mut entries = Vec::with_capacity(chunk.len());
    let mut failures = Vec::new();
    for rel_path in chunk {
        match fingerprint_file(root, rel_path) {
            Ok(entry) => entries.push(entry),
            Err(e) => failures.push(FileFailure {
                path: rel_path.clone(),
                reason: e.to_string(),
            }),
        }
    }
    ChunkResult {
        index,
        entries,
        failures,
    }
}

/// Order failures by chunk, keeping in-chunk order
fn in_discovery_order(mut tagged: Vec<(usize, FileFailure)>) -> Vec<FileFailure> {
    tagged.sort_by_key(|(index, _)| *index);
    tagged.into_iter().map(|(_, failure)| failure).collect()
}

/// The error for `failures` once they exceed `threshold`, naming the earliest
fn threshold_error(failures: &[FileFailure], threshold: usize) -> Option<ManifestError> {
    if failures.len() <= threshold {
        return None;
    }
    let first = failures.first()?;
    Some(if threshold == 0 {
        ManifestError::FileFailed {
            path: first.path.clone(),
            reason: first.reason.clone(),
        }
    } else {
        ManifestError::TooManyFailures {
            count: failures.len(),
            threshold,
            first_path: first.path.clone(),
            first_reason: first.reason.clone(),
        }
    })
}

fn emit(progress: Option<&dyn ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = progress {
        sink.emit(event);
    }
}

fn error_event(error: &ManifestError, files_processed: usize) -> ProgressEvent {
    ProgressEvent::Error {
        message: error.to_string(),
        path: error.offending_path().map(String::from),
        files_processed,
    }
}

/// Generate a manifest with a one-off engine
pub fn generate_file_manifest(
    root: &Path,
    domain: &str,
    config: FingerprintConfig,
) -> Result<FileManifest, ManifestError> {
    FingerprintEngine::new(config)?.generate(root, domain, None)
}
