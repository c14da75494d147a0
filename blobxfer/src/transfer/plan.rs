//! Chunk planning for multi-chunk transfers.

use crate::error::{BlobError, BlobResult};

/// 1 MiB.
pub const MIB: u64 = 1024 * 1024;

/// Default block size for staged uploads (8 MiB).
pub const DEFAULT_UPLOAD_BLOCK_SIZE: u64 = 8 * MIB;

/// Default chunk size for parallel downloads (4 MiB).
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: u64 = 4 * MIB;

/// Smallest block size chosen automatically for very large uploads (4 MiB).
pub const MIN_AUTO_BLOCK_SIZE: u64 = 4 * MIB;

/// Largest block the service accepts in one Put Block call (4000 MiB).
pub const MAX_STAGE_BLOCK_SIZE: u64 = 4000 * MIB;

/// Maximum number of committed blocks in one blob.
pub const MAX_BLOCKS: u64 = 50_000;

/// One unit of a transfer: `length` bytes starting at `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    /// Position in the plan; used to reassemble results in order.
    pub index: usize,
    /// Absolute byte offset.
    pub offset: u64,
    /// Byte count (zero only for the single chunk of an empty transfer).
    pub length: u64,
}

impl ChunkDescriptor {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Inclusive HTTP range header value, e.g. `bytes=0-4194303`.
    ///
    /// Returns `None` for a zero-length chunk, which has no valid range.
    pub fn http_range(&self) -> Option<String> {
        (self.length > 0).then(|| format!("bytes={}-{}", self.offset, self.end() - 1))
    }
}

/// Ordered, gap-free, non-overlapping chunks covering `[0, total_size)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferPlan {
    total_size: u64,
    chunk_size: u64,
    chunks: Vec<ChunkDescriptor>,
}

impl TransferPlan {
    /// Splits `total_size` bytes into chunks of `chunk_size`.
    ///
    /// The last chunk is shortened, never padded. An empty transfer gets one
    /// zero-length chunk so that exactly one operation still runs.
    pub fn new(total_size: u64, chunk_size: u64) -> BlobResult<Self> {
        if chunk_size == 0 {
            return Err(BlobError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        let chunks = if total_size == 0 {
            vec![ChunkDescriptor {
                index: 0,
                offset: 0,
                length: 0,
            }]
        } else {
            let count = total_size.div_ceil(chunk_size);
            (0..count)
                .map(|i| {
                    let offset = i * chunk_size;
                    ChunkDescriptor {
                        index: i as usize,
                        offset,
                        length: chunk_size.min(total_size - offset),
                    }
                })
                .collect()
        };

        Ok(Self {
            total_size,
            chunk_size,
            chunks,
        })
    }

    /// Plans a staged block upload, enforcing the service's block limits.
    pub fn for_upload(total_size: u64, block_size: u64) -> BlobResult<Self> {
        if block_size > MAX_STAGE_BLOCK_SIZE {
            return Err(BlobError::InvalidConfig(format!(
                "block size {} exceeds the maximum of {} bytes",
                block_size, MAX_STAGE_BLOCK_SIZE
            )));
        }
        let plan = Self::new(total_size, block_size)?;
        if plan.len() as u64 > MAX_BLOCKS {
            return Err(BlobError::InvalidConfig(format!(
                "{} bytes in blocks of {} needs {} blocks, more than the limit of {}",
                total_size,
                block_size,
                plan.len(),
                MAX_BLOCKS
            )));
        }
        Ok(plan)
    }

    /// Total bytes covered.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Nominal chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Chunks in ascending offset order.
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    /// Number of chunks (always at least one).
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the plan has no chunks. A plan always has at least one.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Picks a block size for uploading `total_size` bytes.
///
/// 8 MiB unless that would need more than [`MAX_BLOCKS`] blocks, in which
/// case the size grows to fit (never below 4 MiB).
pub fn default_upload_block_size(total_size: u64) -> u64 {
    if total_size > MAX_BLOCKS * DEFAULT_UPLOAD_BLOCK_SIZE {
        total_size.div_ceil(MAX_BLOCKS).max(MIN_AUTO_BLOCK_SIZE)
    } else {
        DEFAULT_UPLOAD_BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_three_chunks_with_short_tail() {
        let plan = TransferPlan::new(10_000_000, 4_000_000).unwrap();
        let lengths: Vec<u64> = plan.chunks().iter().map(|c| c.length).collect();
        assert_eq!(lengths, vec![4_000_000, 4_000_000, 2_000_000]);
        assert_eq!(plan.chunks()[2].offset, 8_000_000);
    }

    #[test]
    fn test_plan_empty_transfer_has_one_zero_chunk() {
        let plan = TransferPlan::new(0, 4 * MIB).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan.chunks()[0],
            ChunkDescriptor {
                index: 0,
                offset: 0,
                length: 0
            }
        );
        assert_eq!(plan.chunks()[0].http_range(), None);
    }

    #[test]
    fn test_plan_chunk_larger_than_payload() {
        let plan = TransferPlan::new(10, 4 * MIB).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.chunks()[0].length, 10);
    }

    #[test]
    fn test_plan_rejects_zero_chunk_size() {
        assert!(TransferPlan::new(10, 0).is_err());
    }

    #[test]
    fn test_http_range_is_inclusive() {
        let chunk = ChunkDescriptor {
            index: 1,
            offset: 4,
            length: 4,
        };
        assert_eq!(chunk.http_range().as_deref(), Some("bytes=4-7"));
        assert_eq!(chunk.end(), 8);
    }

    #[test]
    fn test_upload_plan_enforces_block_limits() {
        assert!(TransferPlan::for_upload(10, MAX_STAGE_BLOCK_SIZE + 1).is_err());
        assert!(TransferPlan::for_upload(MAX_BLOCKS + 1, 1).is_err());
        assert!(TransferPlan::for_upload(MAX_BLOCKS, 1).is_ok());
    }

    #[test]
    fn test_default_upload_block_size() {
        assert_eq!(default_upload_block_size(0), DEFAULT_UPLOAD_BLOCK_SIZE);
        assert_eq!(default_upload_block_size(500 * MIB), DEFAULT_UPLOAD_BLOCK_SIZE);

        let huge = MAX_BLOCKS * DEFAULT_UPLOAD_BLOCK_SIZE * 2;
        let size = default_upload_block_size(huge);
        assert_eq!(size, 16 * MIB);
        assert!(TransferPlan::for_upload(huge, size).is_ok());
    }

    proptest! {
        #[test]
        fn prop_plan_covers_payload_exactly(total in 0u64..50_000_000, chunk in 1u64..5_000_000) {
            let plan = TransferPlan::new(total, chunk).unwrap();

            let sum: u64 = plan.chunks().iter().map(|c| c.length).sum();
            prop_assert_eq!(sum, total);

            let expected = if total == 0 { 1 } else { total.div_ceil(chunk) };
            prop_assert_eq!(plan.len() as u64, expected);

            let mut next = 0u64;
            for (i, c) in plan.chunks().iter().enumerate() {
                prop_assert_eq!(c.index, i);
                prop_assert_eq!(c.offset, next);
                prop_assert!(c.length <= chunk);
                next = c.end();
            }
        }
    }
}
