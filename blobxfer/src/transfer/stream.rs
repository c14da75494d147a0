//! Single-stream downloads that resume after a broken connection.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BlobError, BlobResult, RequestError};
use crate::pipeline::ByteStream;

const STREAM_OPERATION: &str = "DownloadStream";

/// Opens a body stream over `[offset, end)`.
///
/// Each call is a fresh logical request; implementations run it through the
/// retry orchestrator.
pub type OpenRange = Box<dyn FnMut(u64, u64) -> BoxFuture<'static, BlobResult<ByteStream>> + Send>;

/// Reader over `[offset, end)` that re-opens the range at the last delivered
/// offset when the body ends early or breaks.
///
/// Re-opens are limited to `max_restarts`; once spent, a short body fails
/// with [`BlobError::StreamTruncated`]. Bytes past `end` are never yielded.
pub struct ResumableStream {
    open: OpenRange,
    current: Option<ByteStream>,
    offset: u64,
    end: u64,
    restarts: u32,
    max_restarts: u32,
    read_timeout: Option<Duration>,
    cancel: CancellationToken,
    finished: bool,
}

impl fmt::Debug for ResumableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableStream")
            .field("offset", &self.offset)
            .field("end", &self.end)
            .field("restarts", &self.restarts)
            .field("max_restarts", &self.max_restarts)
            .field("read_timeout", &self.read_timeout)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ResumableStream {
    /// Creates a stream over `[offset, end)` that opens its first body lazily.
    pub fn new(
        offset: u64,
        end: u64,
        max_restarts: u32,
        cancel: CancellationToken,
        open: OpenRange,
    ) -> Self {
        Self {
            open,
            current: None,
            offset,
            end,
            restarts: 0,
            max_restarts,
            read_timeout: None,
            cancel,
            finished: offset >= end,
        }
    }

    /// Limits the wait for each body piece. A body that stalls longer is
    /// treated as broken and re-opened.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Uses an already opened body for the first read.
    pub fn with_initial_body(mut self, body: ByteStream) -> Self {
        self.current = Some(body);
        self
    }

    /// Offset of the next byte to be delivered.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Exclusive end of the range.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of times the range has been re-opened.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Next piece of the body, or `None` once `end` is reached.
    ///
    /// After an error the stream is finished and yields `None`.
    pub async fn next_chunk(&mut self) -> Option<BlobResult<Bytes>> {
        if self.finished {
            return None;
        }
        let result = self.read().await;
        match &result {
            Ok(None) | Err(_) => {
                self.finished = true;
                self.current = None;
            }
            Ok(Some(_)) => {}
        }
        result.transpose()
    }

    async fn read(&mut self) -> BlobResult<Option<Bytes>> {
        loop {
            if self.offset >= self.end {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                return Err(BlobError::cancelled(STREAM_OPERATION));
            }

            if self.current.is_none() {
                let opened = (self.open)(self.offset, self.end).await?;
                self.current = Some(opened);
            }
            let read_timeout = self.read_timeout;
            let Some(body) = self.current.as_mut() else {
                continue;
            };
            let piece = async {
                match read_timeout {
                    Some(limit) => tokio::time::timeout(limit, body.next())
                        .await
                        .unwrap_or(Some(Err(RequestError::Timeout(limit)))),
                    None => body.next().await,
                }
            };

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(BlobError::cancelled(STREAM_OPERATION));
                }
                next = piece => next,
            };

            match next {
                Some(Ok(bytes)) if bytes.is_empty() => continue,
                Some(Ok(mut bytes)) => {
                    let remaining = self.end - self.offset;
                    if bytes.len() as u64 > remaining {
                        bytes.truncate(remaining as usize);
                    }
                    self.offset += bytes.len() as u64;
                    return Ok(Some(bytes));
                }
                Some(Err(error)) if error.is_transport() => {
                    self.restart(Some(&error))?;
                }
                Some(Err(RequestError::Cancelled)) => {
                    return Err(BlobError::cancelled(STREAM_OPERATION));
                }
                Some(Err(error)) => {
                    return Err(BlobError::Request {
                        operation: STREAM_OPERATION.to_string(),
                        attempts: self.restarts + 1,
                        source: error,
                    });
                }
                None => self.restart(None)?,
            }
        }
    }

    /// Drops the current body so the next read re-opens at `offset`.
    fn restart(&mut self, error: Option<&RequestError>) -> BlobResult<()> {
        self.current = None;
        if self.restarts >= self.max_restarts {
            warn!(
                offset = self.offset,
                end = self.end,
                restarts = self.restarts,
                "Download stream ended early, no restarts left"
            );
            return Err(BlobError::StreamTruncated {
                offset: self.offset,
                end: self.end,
                restarts: self.restarts,
            });
        }
        self.restarts += 1;
        match error {
            Some(error) => warn!(
                offset = self.offset,
                restart = self.restarts,
                error = %error,
                "Download stream broke, resuming"
            ),
            None => debug!(
                offset = self.offset,
                restart = self.restarts,
                "Download stream ended early, resuming"
            ),
        }
        Ok(())
    }

    /// Reads the rest of the range into memory.
    pub async fn collect_bytes(mut self) -> BlobResult<Bytes> {
        let hint = (self.end - self.offset).min(64 * 1024 * 1024);
        let mut buf = BytesMut::with_capacity(hint as usize);
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Adapts the reader into a `Stream`.
    pub fn into_stream(self) -> BoxStream<'static, BlobResult<Bytes>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_chunk().await.map(|item| (item, stream))
        })
        .boxed()
    }
}
