//! Bounded-concurrency chunk runner for uploads and downloads.
//!
//! Every multi-chunk transfer goes through [`ChunkedTransferCoordinator::run`],
//! which keeps a sliding window of chunk futures:
//!
//! 1. Dispatch up to `concurrency` chunks in ascending offset order.
//! 2. As each chunk completes, hand its result to the sink and dispatch the
//!    next chunk.
//! 3. On the first failure, cancel the remaining chunks and report it.
//!
//! All chunk futures are polled by the calling task inside one
//! `FuturesUnordered`, so the sink runs on that task and may freely borrow
//! the destination (a result vector or output buffer) mutably.

use std::future::Future;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::block::{BlockId, BlockIdGenerator};
use super::options::TransferOptions;
use super::plan::{ChunkDescriptor, TransferPlan};
use super::progress::ProgressCounters;
use crate::error::{BlobError, BlobResult};

const TRANSFER_OPERATION: &str = "ChunkedTransfer";

/// Output of one completed chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkResult<T> {
    /// The chunk that produced `output`.
    pub chunk: ChunkDescriptor,
    /// Per-chunk output: a block ID, the chunk's bytes, or `()`.
    pub output: T,
}

/// Runs transfers as sets of chunks with bounded concurrency.
#[derive(Debug, Clone, Default)]
pub struct ChunkedTransferCoordinator {
    options: TransferOptions,
}

impl ChunkedTransferCoordinator {
    /// Create a coordinator with the given options.
    pub fn new(options: TransferOptions) -> Self {
        Self { options }
    }

    /// The options in use.
    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Plans a staged upload of `total_size` bytes.
    pub fn plan_upload(&self, total_size: u64) -> BlobResult<TransferPlan> {
        TransferPlan::for_upload(total_size, self.options.upload_block_size(total_size))
    }

    /// Plans a ranged download of `total_size` bytes.
    pub fn plan_download(&self, total_size: u64) -> BlobResult<TransferPlan> {
        TransferPlan::new(total_size, self.options.download_chunk_size())
    }

    /// Runs `op` for every chunk of `plan` with at most `concurrency` in
    /// flight, passing each completed chunk to `sink`.
    ///
    /// `op` receives a token that is cancelled when `cancel` fires or when a
    /// sibling chunk fails. Results reach `sink` in completion order; the
    /// chunk's `index` identifies its position.
    pub async fn run<T, F, Fut, S>(
        &self,
        plan: &TransferPlan,
        cancel: &CancellationToken,
        mut op: F,
        mut sink: S,
    ) -> BlobResult<()>
    where
        F: FnMut(ChunkDescriptor, CancellationToken) -> Fut,
        Fut: Future<Output = BlobResult<T>>,
        S: FnMut(ChunkResult<T>) -> BlobResult<()>,
    {
        if cancel.is_cancelled() {
            return Err(BlobError::cancelled(TRANSFER_OPERATION));
        }

        let concurrency = self.options.effective_concurrency().min(plan.len());
        let transfer_token = cancel.child_token();
        // Outstanding chunks are told to stop however this function exits.
        let _guard = transfer_token.clone().drop_guard();
        let counters = ProgressCounters::new(plan.total_size(), plan.len());

        debug!(
            total_bytes = plan.total_size(),
            chunks = plan.len(),
            chunk_size = plan.chunk_size(),
            concurrency,
            "Starting chunked transfer"
        );

        let mut dispatch = |chunk: ChunkDescriptor| {
            let fut = op(chunk, transfer_token.clone());
            async move { (chunk, fut.await) }
        };

        let mut remaining = plan.chunks().iter().copied();
        let mut in_flight = FuturesUnordered::new();
        for chunk in remaining.by_ref().take(concurrency) {
            in_flight.push(dispatch(chunk));
        }

        loop {
            let (chunk, result) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        chunks_completed = counters.chunks_completed(),
                        chunks_total = plan.len(),
                        "Chunked transfer cancelled"
                    );
                    return Err(BlobError::cancelled(TRANSFER_OPERATION));
                }
                next = in_flight.next() => match next {
                    Some(done) => done,
                    None => break,
                },
            };

            let outcome = result.and_then(|output| sink(ChunkResult { chunk, output }));
            if let Err(source) = outcome {
                transfer_token.cancel();
                if cancel.is_cancelled() {
                    return Err(BlobError::cancelled(TRANSFER_OPERATION));
                }
                warn!(
                    index = chunk.index,
                    offset = chunk.offset,
                    error = %source,
                    "Chunk failed, cancelling remaining chunks"
                );
                return Err(BlobError::ChunkFailed {
                    index: chunk.index,
                    offset: chunk.offset,
                    source: Box::new(source),
                });
            }

            counters.mark_completed(chunk.length);
            counters.report(self.options.progress.as_ref());

            if let Some(next) = remaining.next() {
                in_flight.push(dispatch(next));
            }
        }

        debug!(
            bytes = counters.bytes_transferred(),
            chunks = counters.chunks_completed(),
            "Chunked transfer complete"
        );
        Ok(())
    }

    /// Stages every block of a `total_size` upload, then commits the block
    /// list in sequence order.
    ///
    /// `stage_fn` receives the chunk, its block ID and a cancellation token.
    /// `commit_fn` is called only if every block staged successfully.
    pub async fn upload<S, SFut, C, CFut, R>(
        &self,
        total_size: u64,
        cancel: &CancellationToken,
        mut stage_fn: S,
        commit_fn: C,
    ) -> BlobResult<R>
    where
        S: FnMut(ChunkDescriptor, BlockId, CancellationToken) -> SFut,
        SFut: Future<Output = BlobResult<()>>,
        C: FnOnce(Vec<BlockId>) -> CFut,
        CFut: Future<Output = BlobResult<R>>,
    {
        let plan = self.plan_upload(total_size)?;
        let ids = BlockIdGenerator::new();
        let mut slots: Vec<Option<BlockId>> = vec![None; plan.len()];

        self.run(
            &plan,
            cancel,
            |chunk, token| {
                let id = ids.block_id(chunk.index);
                let staged = stage_fn(chunk, id.clone(), token);
                async move { staged.await.map(|()| id) }
            },
            |result: ChunkResult<BlockId>| {
                slots[result.chunk.index] = Some(result.output);
                Ok(())
            },
        )
        .await?;

        let block_ids = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BlobError::UnexpectedResponse {
                operation: "PutBlockList".to_string(),
                reason: "a staged block has no ID".to_string(),
            })?;

        if cancel.is_cancelled() {
            return Err(BlobError::cancelled("PutBlockList"));
        }

        debug!(blocks = block_ids.len(), "All blocks staged, committing");
        commit_fn(block_ids).await
    }

    /// Downloads `buffer.len()` bytes into `buffer`, fetching chunks in
    /// parallel with `fetch_fn`.
    ///
    /// Each chunk's bytes are copied to its offset as soon as it arrives.
    pub async fn download_into<F, Fut>(
        &self,
        buffer: &mut [u8],
        cancel: &CancellationToken,
        fetch_fn: F,
    ) -> BlobResult<()>
    where
        F: FnMut(ChunkDescriptor, CancellationToken) -> Fut,
        Fut: Future<Output = BlobResult<Bytes>>,
    {
        let plan = self.plan_download(buffer.len() as u64)?;

        self.run(&plan, cancel, fetch_fn, |result: ChunkResult<Bytes>| {
            let ChunkResult { chunk, output } = result;
            if output.len() as u64 != chunk.length {
                return Err(BlobError::UnexpectedResponse {
                    operation: "GetBlob".to_string(),
                    reason: format!(
                        "chunk at offset {} returned {} bytes, expected {}",
                        chunk.offset,
                        output.len(),
                        chunk.length
                    ),
                });
            }
            let start = chunk.offset as usize;
            buffer[start..start + output.len()].copy_from_slice(&output);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::error::RequestError;
    use crate::transfer::progress::TransferProgress;

    fn coordinator(chunk_size: u64, concurrency: usize) -> ChunkedTransferCoordinator {
        ChunkedTransferCoordinator::new(
            TransferOptions::new()
                .with_chunk_size(chunk_size)
                .with_concurrency(concurrency),
        )
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlight {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_respects_concurrency_bound() {
        let plan = TransferPlan::new(100, 10).unwrap();
        let tracker = Arc::new(InFlight::default());
        let mut seen = Vec::new();

        coordinator(10, 3)
            .run(
                &plan,
                &CancellationToken::new(),
                |chunk, _token| {
                    let tracker = Arc::clone(&tracker);
                    async move {
                        tracker.enter();
                        // Later chunks finish sooner so completion order differs.
                        tokio::time::sleep(Duration::from_millis(100 - chunk.index as u64 * 5))
                            .await;
                        tracker.leave();
                        Ok(chunk.index)
                    }
                },
                |result| {
                    seen.push(result.output);
                    Ok(())
                },
            )
            .await
            .unwrap();

        assert_eq!(tracker.peak.load(Ordering::SeqCst), 3);
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_concurrency_uses_default() {
        let plan = TransferPlan::new(100, 1).unwrap();
        let tracker = Arc::new(InFlight::default());

        coordinator(1, 0)
            .run(
                &plan,
                &CancellationToken::new(),
                |_chunk, _token| {
                    let tracker = Arc::clone(&tracker);
                    async move {
                        tracker.enter();
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        tracker.leave();
                        Ok(())
                    }
                },
                |_| Ok(()),
            )
            .await
            .unwrap();

        assert_eq!(
            tracker.peak.load(Ordering::SeqCst),
            crate::transfer::DEFAULT_CONCURRENCY
        );
    }

    #[tokio::test]
    async fn test_dispatch_is_in_offset_order() {
        let plan = TransferPlan::new(50, 10).unwrap();
        let dispatched = Mutex::new(Vec::new());

        coordinator(10, 2)
            .run(
                &plan,
                &CancellationToken::new(),
                |chunk, _token| {
                    dispatched.lock().unwrap().push(chunk.offset);
                    async { Ok(()) }
                },
                |_| Ok(()),
            )
            .await
            .unwrap();

        assert_eq!(dispatched.into_inner().unwrap(), vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_download_into_reassembles_out_of_order() {
        let source = Bytes::from(payload(10_000));
        let mut buffer = vec![0u8; source.len()];

        coordinator(1_000, 4)
            .download_into(&mut buffer, &CancellationToken::new(), |chunk, _token| {
                let source = source.clone();
                async move {
                    // Reverse the completion order.
                    for _ in 0..(10 - chunk.index) {
                        tokio::task::yield_now().await;
                    }
                    Ok(source.slice(chunk.offset as usize..chunk.end() as usize))
                }
            })
            .await
            .unwrap();

        assert_eq!(buffer, source.to_vec());
    }

    #[tokio::test]
    async fn test_download_into_rejects_short_chunk() {
        let mut buffer = vec![0u8; 20];
        let err = coordinator(10, 2)
            .download_into(&mut buffer, &CancellationToken::new(), |_chunk, _token| async {
                Ok(Bytes::from_static(b"short"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BlobError::ChunkFailed { .. }));
    }

    #[tokio::test]
    async fn test_upload_commits_ids_in_sequence_order() {
        let data = Bytes::from(payload(35));
        let staged = Mutex::new(Vec::new());

        let committed = coordinator(10, 4)
            .upload(
                data.len() as u64,
                &CancellationToken::new(),
                |chunk, id, _token| {
                    staged
                        .lock()
                        .unwrap()
                        .push((id, data.slice(chunk.offset as usize..chunk.end() as usize)));
                    async move {
                        for _ in 0..(4 - chunk.index) {
                            tokio::task::yield_now().await;
                        }
                        Ok(())
                    }
                },
                |ids| async move { Ok(ids) },
            )
            .await
            .unwrap();

        let staged = staged.into_inner().unwrap();
        assert_eq!(committed.len(), 4);
        let reassembled: Vec<u8> = committed
            .iter()
            .flat_map(|id| {
                let (_, bytes) = staged.iter().find(|(s, _)| s == id).unwrap();
                bytes.to_vec()
            })
            .collect();
        assert_eq!(reassembled, data.to_vec());
    }

    #[tokio::test]
    async fn test_failed_chunk_skips_commit_and_cancels_siblings() {
        let commit_called = AtomicUsize::new(0);

        let err = coordinator(10, 4)
            .upload(
                40,
                &CancellationToken::new(),
                |chunk, _id, token| {
                    async move {
                        if chunk.index == 1 {
                            return Err(BlobError::Request {
                                operation: "PutBlock".to_string(),
                                attempts: 4,
                                source: RequestError::status(500, "primary"),
                            });
                        }
                        token.cancelled().await;
                        Err(BlobError::cancelled("PutBlock"))
                    }
                },
                |_ids| {
                    commit_called.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await
            .unwrap_err();

        match err {
            BlobError::ChunkFailed { index, offset, .. } => {
                assert_eq!(index, 1);
                assert_eq!(offset, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(commit_called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_cancels_token_seen_by_other_chunks() {
        let tokens = Mutex::new(Vec::new());

        let result = coordinator(10, 3)
            .run(
                &TransferPlan::new(30, 10).unwrap(),
                &CancellationToken::new(),
                |chunk, token| {
                    tokens.lock().unwrap().push(token.clone());
                    async move {
                        if chunk.index == 0 {
                            Err(BlobError::InvalidConfig("boom".into()))
                        } else {
                            token.cancelled().await;
                            Ok(())
                        }
                    }
                },
                |_: ChunkResult<()>| Ok(()),
            )
            .await;

        assert!(matches!(result, Err(BlobError::ChunkFailed { index: 0, .. })));
        assert!(tokens.lock().unwrap().iter().all(|t| t.is_cancelled()));
    }

    #[tokio::test]
    async fn test_caller_cancellation_stops_transfer() {
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let trigger = cancel.clone();

        let err = coordinator(10, 2)
            .run(
                &TransferPlan::new(100, 10).unwrap(),
                &cancel,
                |_chunk, token| {
                    let started = Arc::clone(&started);
                    let trigger = trigger.clone();
                    async move {
                        if started.fetch_add(1, Ordering::SeqCst) == 1 {
                            trigger.cancel();
                        }
                        token.cancelled().await;
                        Err::<(), _>(BlobError::cancelled("GetBlob"))
                    }
                },
                |_| Ok(()),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!matches!(err, BlobError::ChunkFailed { .. }));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);

        let err = coordinator(10, 2)
            .run(
                &TransferPlan::new(30, 10).unwrap(),
                &cancel,
                |_chunk, _token| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                |_| Ok(()),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_transfer_runs_one_operation() {
        let calls = AtomicUsize::new(0);
        coordinator(10, 4)
            .run(
                &TransferPlan::new(0, 10).unwrap(),
                &CancellationToken::new(),
                |chunk, _token| {
                    assert_eq!(chunk.length, 0);
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                |_| Ok(()),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_reported_per_chunk() {
        let seen: Arc<Mutex<Vec<TransferProgress>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let coordinator = ChunkedTransferCoordinator::new(
            TransferOptions::new()
                .with_chunk_size(4)
                .with_concurrency(1)
                .with_progress(Arc::new(move |p| sink.lock().unwrap().push(p))),
        );

        coordinator
            .run(
                &TransferPlan::new(10, 4).unwrap(),
                &CancellationToken::new(),
                |_chunk, _token| async { Ok(()) },
                |_| Ok(()),
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let bytes: Vec<u64> = seen.iter().map(|p| p.bytes_transferred).collect();
        assert_eq!(bytes, vec![4, 8, 10]);
        assert_eq!(seen[2].chunks_completed, 3);
        assert_eq!(seen[2].total_chunks, 3);
    }
}
