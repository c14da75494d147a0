//! Options for chunked transfers.

use std::fmt;

use super::plan::{default_upload_block_size, DEFAULT_DOWNLOAD_CHUNK_SIZE, MIB};
use super::progress::ProgressCallback;

/// Number of chunks in flight when no concurrency is configured.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Largest payload uploaded with a single Put Blob request (256 MiB).
pub const DEFAULT_MAX_SINGLE_SHOT_SIZE: u64 = 256 * MIB;

/// How often a single-stream download may be re-opened.
pub const DEFAULT_MAX_RETRY_REQUESTS: u32 = 5;

/// Tuning for uploads and downloads.
#[derive(Clone, Default)]
pub struct TransferOptions {
    /// Chunk size; `None` picks the per-direction default.
    pub chunk_size: Option<u64>,

    /// Maximum chunks in flight; `0` means [`DEFAULT_CONCURRENCY`].
    pub concurrency: usize,

    /// Payloads up to this size are uploaded in one request; `None` means
    /// [`DEFAULT_MAX_SINGLE_SHOT_SIZE`].
    pub max_single_shot_size: Option<u64>,

    /// Re-open budget for resumable streams; `None` means
    /// [`DEFAULT_MAX_RETRY_REQUESTS`].
    pub max_retry_requests: Option<u32>,

    /// Called after each completed chunk.
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("chunk_size", &self.chunk_size)
            .field("concurrency", &self.concurrency)
            .field("max_single_shot_size", &self.max_single_shot_size)
            .field("max_retry_requests", &self.max_retry_requests)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl TransferOptions {
    /// Create options with every value at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Set the concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the single-shot upload threshold.
    pub fn with_max_single_shot_size(mut self, size: u64) -> Self {
        self.max_single_shot_size = Some(size);
        self
    }

    /// Set how many times a resumable stream may be re-opened.
    pub fn with_max_retry_requests(mut self, count: u32) -> Self {
        self.max_retry_requests = Some(count);
        self
    }

    /// Set the progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Concurrency with `0` mapped to the default.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }

    /// Block size for uploading `total_size` bytes.
    pub fn upload_block_size(&self, total_size: u64) -> u64 {
        self.chunk_size
            .unwrap_or_else(|| default_upload_block_size(total_size))
    }

    /// Chunk size for downloads.
    pub fn download_chunk_size(&self) -> u64 {
        self.chunk_size.unwrap_or(DEFAULT_DOWNLOAD_CHUNK_SIZE)
    }

    /// Single-shot upload threshold.
    pub fn single_shot_limit(&self) -> u64 {
        self.max_single_shot_size
            .unwrap_or(DEFAULT_MAX_SINGLE_SHOT_SIZE)
    }

    /// Re-open budget for resumable streams.
    pub fn retry_requests(&self) -> u32 {
        self.max_retry_requests.unwrap_or(DEFAULT_MAX_RETRY_REQUESTS)
    }
}
