//! Operations on any blob: properties, downloads, copy and delete.

use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::Method;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::ClientCore;
use crate::error::{BlobError, BlobResult, RequestError};
use crate::pipeline::{ByteStream, PipelineRequest, PipelineResponse};
use crate::poller::{PollObservation, PollOperation, PollState, Poller};
use crate::retry::{AttemptTarget, LogicalOperation};
use crate::transfer::{ChunkResult, ResumableStream};

/// State of the last copy into a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Aborted,
    Failed,
}

impl FromStr for CopyStatus {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "aborted" => Ok(Self::Aborted),
            "failed" => Ok(Self::Failed),
            other => Err(BlobError::UnexpectedResponse {
                operation: "CopyBlob".to_string(),
                reason: format!("unknown copy status '{}'", other),
            }),
        }
    }
}

/// Copy metadata reported with blob properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyState {
    pub id: Option<String>,
    pub status: CopyStatus,
    /// `"<copied>/<total>"` bytes.
    pub progress: Option<String>,
    pub status_description: Option<String>,
}

/// Result of Get Blob Properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub copy: Option<CopyState>,
}

impl BlobProperties {
    fn from_response(response: &PipelineResponse) -> BlobResult<Self> {
        let content_length =
            response
                .header_u64("content-length")
                .ok_or_else(|| BlobError::UnexpectedResponse {
                    operation: "GetBlobProperties".to_string(),
                    reason: "missing content-length".to_string(),
                })?;
        let text = |name: &str| response.header(name).map(str::to_string);

        let copy = match response.header("x-ms-copy-status") {
            Some(status) => Some(CopyState {
                id: text("x-ms-copy-id"),
                status: status.parse()?,
                progress: text("x-ms-copy-progress"),
                status_description: text("x-ms-copy-status-description"),
            }),
            None => None,
        };

        Ok(Self {
            content_length,
            content_type: text("content-type"),
            etag: text("etag"),
            last_modified: response
                .header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|d| d.with_timezone(&Utc)),
            copy,
        })
    }
}

/// Outcome of a completed server-side copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyOutcome {
    pub copy_id: String,
    pub progress: Option<String>,
}

/// Handle to one blob.
#[derive(Clone)]
pub struct BlobClient {
    core: Arc<ClientCore>,
    container: String,
    blob: String,
}

impl fmt::Debug for BlobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobClient")
            .field("container", &self.container)
            .field("blob", &self.blob)
            .finish_non_exhaustive()
    }
}

impl BlobClient {
    pub(crate) fn new(core: Arc<ClientCore>, container: String, blob: String) -> Self {
        Self {
            core,
            container,
            blob,
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container
    }

    pub fn blob_name(&self) -> &str {
        &self.blob
    }

    /// The blob's URL on the primary endpoint, including any SAS token.
    pub fn url(&self) -> BlobResult<Url> {
        self.core
            .url(self.core.primary_host(), &self.container, Some(&self.blob), &[])
            .map_err(|e| BlobError::InvalidConfig(e.to_string()))
    }

    pub(super) fn core(&self) -> &Arc<ClientCore> {
        &self.core
    }

    /// Request addressed to this blob on the attempt's host.
    pub(super) fn request(
        &self,
        method: Method,
        target: &AttemptTarget,
        query: &[(&str, &str)],
    ) -> Result<PipelineRequest, RequestError> {
        let url = self
            .core
            .url(&target.host, &self.container, Some(&self.blob), query)?;
        Ok(PipelineRequest::new(method, url))
    }

    /// Reads the blob's size, content headers and copy state.
    pub async fn get_properties(&self, cancel: &CancellationToken) -> BlobResult<BlobProperties> {
        let op = LogicalOperation::new("GetBlobProperties", Method::HEAD);
        let response = self
            .core
            .send(&op, cancel, true, |target| self.request(Method::HEAD, target, &[]))
            .await?;
        BlobProperties::from_response(&response)
    }

    /// Downloads `count` bytes starting at `offset`, or the rest of the blob
    /// when `count` is `None`.
    pub async fn download_range(
        &self,
        offset: u64,
        count: Option<u64>,
        cancel: &CancellationToken,
    ) -> BlobResult<Bytes> {
        if count == Some(0) {
            return Ok(Bytes::new());
        }
        let range = range_header(offset, count.map(|c| offset + c));
        let op = LogicalOperation::read("GetBlob");
        let response = self
            .core
            .send(&op, cancel, true, |target| {
                self.request(Method::GET, target, &[])?
                    .with_header("x-ms-range", &range)
            })
            .await?;
        Ok(response.bytes())
    }

    /// Downloads the whole blob into memory with parallel ranged reads.
    pub async fn download_to_buffer(&self, cancel: &CancellationToken) -> BlobResult<Bytes> {
        let size = self.get_properties(cancel).await?.content_length;
        let mut buffer = vec![0u8; to_usize(size)?];

        self.core
            .transfer()
            .download_into(&mut buffer, cancel, move |chunk, token| async move {
                self.download_range(chunk.offset, Some(chunk.length), &token)
                    .await
            })
            .await?;

        info!(blob = %self.blob, bytes = size, "Downloaded blob to memory");
        Ok(Bytes::from(buffer))
    }

    /// Downloads the whole blob to `path` with parallel ranged reads.
    ///
    /// The file is sized up front and every chunk writes its own range
    /// through its own handle. A failed download removes the file.
    pub async fn download_to_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> BlobResult<u64> {
        let size = self.get_properties(cancel).await?.content_length;
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| BlobError::io(path, e))?;
        file.set_len(size).await.map_err(|e| BlobError::io(path, e))?;
        drop(file);

        let transfer = self.core.transfer();
        let plan = transfer.plan_download(size)?;
        let dest = path.to_path_buf();
        let result = transfer
            .run(
                &plan,
                cancel,
                move |chunk, token| {
                    let dest = dest.clone();
                    async move {
                        let bytes = self
                            .download_range(chunk.offset, Some(chunk.length), &token)
                            .await?;
                        if bytes.len() as u64 != chunk.length {
                            return Err(BlobError::UnexpectedResponse {
                                operation: "GetBlob".to_string(),
                                reason: format!(
                                    "chunk at offset {} returned {} bytes, expected {}",
                                    chunk.offset,
                                    bytes.len(),
                                    chunk.length
                                ),
                            });
                        }
                        write_at(&dest, chunk.offset, &bytes).await
                    }
                },
                |_: ChunkResult<()>| Ok(()),
            )
            .await;

        if let Err(e) = result {
            if let Err(remove) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %remove, "Failed to remove partial download");
            }
            return Err(e);
        }

        info!(blob = %self.blob, path = %path.display(), bytes = size, "Downloaded blob to file");
        Ok(size)
    }

    /// Opens the whole blob as one stream that resumes after broken
    /// connections.
    pub async fn download_stream(&self, cancel: &CancellationToken) -> BlobResult<ResumableStream> {
        let size = self.get_properties(cancel).await?.content_length;
        let max_restarts = self.core.transfer().options().retry_requests();

        let client = self.clone();
        let open_cancel = cancel.clone();
        let open = Box::new(move |offset: u64, end: u64| {
            let client = client.clone();
            let cancel = open_cancel.clone();
            let opened: BoxFuture<'static, BlobResult<ByteStream>> =
                Box::pin(async move { client.open_range(offset, end, &cancel).await });
            opened
        });

        let read_timeout = self.core.retry_config().try_timeout;
        Ok(ResumableStream::new(0, size, max_restarts, cancel.clone(), open)
            .with_read_timeout(read_timeout))
    }

    /// Starts a streaming GET of `[offset, end)`.
    async fn open_range(
        &self,
        offset: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> BlobResult<ByteStream> {
        debug!(blob = %self.blob, offset, end, "Opening blob stream");
        let range = range_header(offset, Some(end));
        let op = LogicalOperation::read("GetBlob");
        let response = self
            .core
            .send(&op, cancel, false, |target| {
                self.request(Method::GET, target, &[])?
                    .with_header("x-ms-range", &range)
            })
            .await?;
        Ok(response.into_stream())
    }

    /// Starts a server-side copy from `source_url` into this blob.
    ///
    /// The returned poller is already terminal if the service finished the
    /// copy synchronously.
    pub async fn start_copy_from_url(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> BlobResult<Poller<CopyPollOperation>> {
        let op = LogicalOperation::write("CopyBlob");
        let response = self
            .core
            .send(&op, cancel, true, |target| {
                self.request(Method::PUT, target, &[])?
                    .with_header("x-ms-copy-source", source_url)
            })
            .await?;

        let copy_id = response
            .header("x-ms-copy-id")
            .map(str::to_string)
            .ok_or_else(|| BlobError::UnexpectedResponse {
                operation: "CopyBlob".to_string(),
                reason: "missing x-ms-copy-id".to_string(),
            })?;
        let status: CopyStatus = response
            .header("x-ms-copy-status")
            .unwrap_or("pending")
            .parse()?;

        info!(blob = %self.blob, copy_id = %copy_id, status = ?status, "Copy started");

        let state = match status {
            CopyStatus::Pending => PollState::InProgress { progress: None },
            CopyStatus::Success => PollState::Succeeded(CopyOutcome {
                copy_id: copy_id.clone(),
                progress: None,
            }),
            CopyStatus::Failed => PollState::Failed("copy failed".to_string()),
            CopyStatus::Aborted => PollState::Cancelled,
        };
        let operation = CopyPollOperation {
            blob: self.clone(),
            copy_id,
        };
        Ok(Poller::new(operation, state, cancel.clone()))
    }

    /// Aborts a pending copy.
    pub async fn abort_copy(&self, copy_id: &str, cancel: &CancellationToken) -> BlobResult<()> {
        let op = LogicalOperation::write("AbortCopyBlob");
        self.core
            .send(&op, cancel, true, |target| {
                self.request(Method::PUT, target, &[("comp", "copy"), ("copyid", copy_id)])?
                    .with_header("x-ms-copy-action", "abort")
            })
            .await?;
        info!(blob = %self.blob, copy_id, "Copy aborted");
        Ok(())
    }

    /// Deletes the blob.
    pub async fn delete(&self, cancel: &CancellationToken) -> BlobResult<()> {
        let op = LogicalOperation::new("DeleteBlob", Method::DELETE);
        self.core
            .send(&op, cancel, true, |target| {
                self.request(Method::DELETE, target, &[])
            })
            .await?;
        info!(container = %self.container, blob = %self.blob, "Blob deleted");
        Ok(())
    }
}

/// Polls a copy through Get Blob Properties.
#[derive(Debug)]
pub struct CopyPollOperation {
    blob: BlobClient,
    copy_id: String,
}

impl CopyPollOperation {
    pub fn copy_id(&self) -> &str {
        &self.copy_id
    }
}

impl PollOperation for CopyPollOperation {
    type Output = CopyOutcome;

    fn poll<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, BlobResult<PollObservation<CopyOutcome>>> {
        Box::pin(async move {
            let properties = self.blob.get_properties(cancel).await?;
            let Some(copy) = properties.copy else {
                return Err(BlobError::UnexpectedResponse {
                    operation: "GetBlobProperties".to_string(),
                    reason: "blob has no copy status".to_string(),
                });
            };
            if copy.id.as_deref().is_some_and(|id| id != self.copy_id) {
                return Ok(PollObservation::Failed(format!(
                    "copy {} was replaced by another copy",
                    self.copy_id
                )));
            }

            Ok(match copy.status {
                CopyStatus::Pending => PollObservation::Pending {
                    progress: copy.progress,
                },
                CopyStatus::Success => PollObservation::Succeeded(CopyOutcome {
                    copy_id: self.copy_id.clone(),
                    progress: copy.progress,
                }),
                CopyStatus::Failed => PollObservation::Failed(
                    copy.status_description
                        .unwrap_or_else(|| "copy failed".to_string()),
                ),
                CopyStatus::Aborted => PollObservation::Aborted,
            })
        })
    }

    fn cancel(&self) -> BoxFuture<'_, BlobResult<()>> {
        // The caller's token is already cancelled; the abort needs its own.
        Box::pin(async move {
            self.blob
                .abort_copy(&self.copy_id, &CancellationToken::new())
                .await
        })
    }
}

/// `bytes=<offset>-[<end - 1>]`.
fn range_header(offset: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={}-{}", offset, end - 1),
        None => format!("bytes={}-", offset),
    }
}

fn to_usize(size: u64) -> BlobResult<usize> {
    usize::try_from(size).map_err(|_| {
        BlobError::InvalidConfig(format!("blob of {} bytes does not fit in memory", size))
    })
}

async fn write_at(path: &Path, offset: u64, bytes: &[u8]) -> BlobResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| BlobError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| BlobError::io(path, e))?;
    file.write_all(bytes).await.map_err(|e| BlobError::io(path, e))?;
    file.flush().await.map_err(|e| BlobError::io(path, e))
}
