use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{BlobClient, BlockBlobClient, ClientCore};
use crate::error::{BlobError, BlobResult, RequestError};
use crate::pipeline::PipelineRequest;
use crate::retry::{AttemptTarget, LogicalOperation};

/// Handle to one container.
#[derive(Clone)]
pub struct ContainerClient {
    core: Arc<ClientCore>,
    name: String,
}

impl fmt::Debug for ContainerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerClient")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ContainerClient {
    pub(crate) fn new(core: Arc<ClientCore>, name: String) -> Self {
        Self { core, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blob_client(&self, blob: impl Into<String>) -> BlobClient {
        BlobClient::new(Arc::clone(&self.core), self.name.clone(), blob.into())
    }

    pub fn block_blob_client(&self, blob: impl Into<String>) -> BlockBlobClient {
        BlockBlobClient::new(self.blob_client(blob))
    }

    fn request(&self, method: Method, target: &AttemptTarget) -> Result<PipelineRequest, RequestError> {
        let url = self
            .core
            .url(&target.host, &self.name, None, &[("restype", "container")])?;
        Ok(PipelineRequest::new(method, url))
    }

    /// Creates the container. Fails with a 409 status if it already exists.
    pub async fn create(&self, cancel: &CancellationToken) -> BlobResult<()> {
        let op = LogicalOperation::write("CreateContainer");
        self.core
            .send(&op, cancel, true, |target| self.request(Method::PUT, target))
            .await?;
        info!(container = %self.name, "Container created");
        Ok(())
    }

    /// Creates the container unless it already exists. Returns whether it
    /// was created.
    pub async fn create_if_not_exists(&self, cancel: &CancellationToken) -> BlobResult<bool> {
        match self.create(cancel).await {
            Ok(()) => Ok(true),
            Err(BlobError::Request { source, .. }) if source.status_code() == Some(409) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Marks the container for deletion.
    pub async fn delete(&self, cancel: &CancellationToken) -> BlobResult<()> {
        let op = LogicalOperation::new("DeleteContainer", Method::DELETE);
        self.core
            .send(&op, cancel, true, |target| self.request(Method::DELETE, target))
            .await?;
        info!(container = %self.name, "Container deleted");
        Ok(())
    }
}
