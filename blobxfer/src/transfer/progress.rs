//! Progress reporting for chunked transfers.
//!
//! Chunk completions are recorded in atomic counters that any task can read.
//! The coordinating task reports a [`TransferProgress`] snapshot to the
//! optional callback after each completion.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of a transfer's progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes moved so far across all completed chunks.
    pub bytes_transferred: u64,
    /// Total bytes in the transfer.
    pub total_bytes: u64,
    /// Chunks fully completed.
    pub chunks_completed: usize,
    /// Total chunks in the plan.
    pub total_chunks: usize,
}

impl TransferProgress {
    /// Completion ratio in `[0, 1]`; an empty transfer counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_transferred as f64 / self.total_bytes as f64
        }
    }
}

/// Callback invoked with a snapshot after each chunk completes.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Shared counters for one transfer.
#[derive(Debug)]
pub struct ProgressCounters {
    total_bytes: u64,
    total_chunks: usize,
    bytes_transferred: AtomicU64,
    chunks_completed: AtomicUsize,
}

impl ProgressCounters {
    /// Create counters for a transfer of `total_bytes` in `total_chunks`.
    pub fn new(total_bytes: u64, total_chunks: usize) -> Self {
        Self {
            total_bytes,
            total_chunks,
            bytes_transferred: AtomicU64::new(0),
            chunks_completed: AtomicUsize::new(0),
        }
    }

    /// Record a completed chunk of `bytes` length.
    pub fn mark_completed(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::SeqCst);
        self.chunks_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Get the total bytes transferred so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::SeqCst)
    }

    /// Get the number of completed chunks.
    pub fn chunks_completed(&self) -> usize {
        self.chunks_completed.load(Ordering::SeqCst)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> TransferProgress {
        TransferProgress {
            bytes_transferred: self.bytes_transferred(),
            total_bytes: self.total_bytes,
            chunks_completed: self.chunks_completed(),
            total_chunks: self.total_chunks,
        }
    }

    /// Pass the current snapshot to `callback`, if one is set.
    pub fn report(&self, callback: Option<&ProgressCallback>) {
        if let Some(callback) = callback {
            callback(self.snapshot());
        }
    }
}
