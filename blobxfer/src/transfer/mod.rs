//! Chunked parallel transfers.
//!
//! Large uploads are split into blocks that are staged concurrently and then
//! committed as one block list. Large downloads are split into ranges fetched
//! concurrently and written at their offsets. Both run through
//! [`ChunkedTransferCoordinator::run`], which bounds how many chunks are in
//! flight and cancels the rest when one fails.
//!
//! Single-stream downloads use [`ResumableStream`] instead, which re-opens
//! the remaining range when the body ends early.

mod block;
mod coordinator;
mod options;
mod plan;
mod progress;
mod stream;

pub use block::{BlockId, BlockIdGenerator};
pub use coordinator::{ChunkResult, ChunkedTransferCoordinator};
pub use options::{
    TransferOptions, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRY_REQUESTS, DEFAULT_MAX_SINGLE_SHOT_SIZE,
};
pub use plan::{
    default_upload_block_size, ChunkDescriptor, TransferPlan, DEFAULT_DOWNLOAD_CHUNK_SIZE,
    DEFAULT_UPLOAD_BLOCK_SIZE, MAX_BLOCKS, MAX_STAGE_BLOCK_SIZE, MIB, MIN_AUTO_BLOCK_SIZE,
};
pub use progress::{ProgressCallback, ProgressCounters, TransferProgress};
pub use stream::{OpenRange, ResumableStream};
