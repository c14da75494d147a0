//! Block blob uploads.

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::BlobClient;
use crate::error::{BlobError, BlobResult};
use crate::pipeline::PipelineResponse;
use crate::retry::LogicalOperation;
use crate::transfer::{BlockId, ProgressCounters, TransferOptions};

/// Returned by Put Blob and Put Block List.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadResponse {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl UploadResponse {
    fn from_response(response: &PipelineResponse) -> Self {
        Self {
            etag: response.header("etag").map(str::to_string),
            last_modified: response
                .header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }
}

/// Handle to a block blob.
#[derive(Clone, Debug)]
pub struct BlockBlobClient {
    blob: BlobClient,
}

impl BlockBlobClient {
    pub(crate) fn new(blob: BlobClient) -> Self {
        Self { blob }
    }

    /// Generic blob operations (download, copy, delete) on the same blob.
    pub fn blob_client(&self) -> &BlobClient {
        &self.blob
    }

    /// Uploads `data` with one Put Blob request, replacing the blob.
    pub async fn upload(&self, data: Bytes, cancel: &CancellationToken) -> BlobResult<UploadResponse> {
        let op = LogicalOperation::write("PutBlob");
        let response = self
            .blob
            .core()
            .send(&op, cancel, true, |target| {
                Ok(self
                    .blob
                    .request(Method::PUT, target, &[])?
                    .with_header("x-ms-blob-type", "BlockBlob")?
                    .with_body(data.clone()))
            })
            .await?;
        Ok(UploadResponse::from_response(&response))
    }

    /// Stages one uncommitted block.
    pub async fn stage_block(
        &self,
        id: &BlockId,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> BlobResult<()> {
        let op = LogicalOperation::write("PutBlock");
        self.blob
            .core()
            .send(&op, cancel, true, |target| {
                Ok(self
                    .blob
                    .request(
                        Method::PUT,
                        target,
                        &[("comp", "block"), ("blockid", id.as_str())],
                    )?
                    .with_body(data.clone()))
            })
            .await?;
        Ok(())
    }

    /// Commits staged blocks, in the given order, as the blob's content.
    pub async fn commit_block_list(
        &self,
        ids: &[BlockId],
        cancel: &CancellationToken,
    ) -> BlobResult<UploadResponse> {
        let body = Bytes::from(block_list_xml(ids));
        let op = LogicalOperation::write("PutBlockList");
        let response = self
            .blob
            .core()
            .send(&op, cancel, true, |target| {
                Ok(self
                    .blob
                    .request(Method::PUT, target, &[("comp", "blocklist")])?
                    .with_header("content-type", "application/xml")?
                    .with_body(body.clone()))
            })
            .await?;
        info!(blob = %self.blob.blob_name(), blocks = ids.len(), "Block list committed");
        Ok(UploadResponse::from_response(&response))
    }

    /// Uploads `data`, in one request when it fits under the single-shot
    /// limit and as parallel staged blocks otherwise.
    pub async fn upload_data(
        &self,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> BlobResult<UploadResponse> {
        let total = data.len() as u64;
        let transfer = self.blob.core().transfer();
        if total <= transfer.options().single_shot_limit() {
            let response = self.upload(data, cancel).await?;
            report_single_shot(transfer.options(), total);
            return Ok(response);
        }

        debug!(blob = %self.blob.blob_name(), bytes = total, "Uploading in blocks");
        transfer
            .upload(
                total,
                cancel,
                move |chunk, id, token| {
                    let body = data.slice(chunk.offset as usize..chunk.end() as usize);
                    async move { self.stage_block(&id, body, &token).await }
                },
                move |ids| async move { self.commit_block_list(&ids, cancel).await },
            )
            .await
    }

    /// Uploads the file at `path`. Staged blocks each read their own range
    /// of the file.
    pub async fn upload_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> BlobResult<UploadResponse> {
        let total = tokio::fs::metadata(path)
            .await
            .map_err(|e| BlobError::io(path, e))?
            .len();
        let transfer = self.blob.core().transfer();

        if total <= transfer.options().single_shot_limit() {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| BlobError::io(path, e))?;
            let response = self.upload(Bytes::from(data), cancel).await?;
            report_single_shot(transfer.options(), total);
            return Ok(response);
        }

        debug!(path = %path.display(), bytes = total, "Uploading file in blocks");
        let source = path.to_path_buf();
        transfer
            .upload(
                total,
                cancel,
                move |chunk, id, token| {
                    let source = source.clone();
                    async move {
                        let body = read_range(&source, chunk.offset, chunk.length).await?;
                        self.stage_block(&id, body, &token).await
                    }
                },
                move |ids| async move { self.commit_block_list(&ids, cancel).await },
            )
            .await
    }
}

/// `<BlockList>` body naming every block as `Latest`.
fn block_list_xml(ids: &[BlockId]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
    for id in ids {
        xml.push_str("<Latest>");
        xml.push_str(id.as_str());
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

fn report_single_shot(options: &TransferOptions, total: u64) {
    let counters = ProgressCounters::new(total, 1);
    counters.mark_completed(total);
    counters.report(options.progress.as_ref());
}

async fn read_range(path: &Path, offset: u64, length: u64) -> BlobResult<Bytes> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| BlobError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| BlobError::io(path, e))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|e| BlobError::io(path, e))?;
    Ok(Bytes::from(buf))
}
