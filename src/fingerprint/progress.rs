//! Progress notifications for manifest generation
//!
//! Events fire at exactly four points: discovery complete, each chunk
//! complete, manifest complete, and the first fatal error. They never
//! affect the manifest.

use serde::Serialize;
use std::sync::mpsc::Sender;

/// Lifecycle notification emitted by the fingerprint engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Discovery {
        files_discovered: usize,
    },
    Processing {
        files_processed: usize,
        total_files: usize,
        chunk_index: usize,
        percentage: u8,
    },
    Completed {
        total_files: usize,
        total_size_bytes: u64,
        elapsed_ms: u64,
    },
    Error {
        message: String,
        path: Option<String>,
        files_processed: usize,
    },
}

impl ProgressEvent {
    /// Percentage complete, clamped to 0..=100
    pub fn percentage(processed: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        ((processed.min(total) * 100) / total) as u8
    }
}

/// Receiver of progress events
pub trait ProgressSink {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent),
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(event);
    }
}
