use std::sync::Arc;

use super::{ClientCore, ContainerClient};
use crate::config::ClientConfig;
use crate::error::BlobResult;

/// Entry point for a storage account.
///
/// Holds the shared pipeline, retry settings and transfer options. Cloning is
/// cheap and every child client shares them.
#[derive(Clone, Debug)]
pub struct BlobServiceClient {
    core: Arc<ClientCore>,
}

impl BlobServiceClient {
    /// Builds a client. Fails if the retry settings are invalid or a SAS
    /// token is combined with another credential.
    pub fn new(config: ClientConfig) -> BlobResult<Self> {
        Ok(Self {
            core: ClientCore::new(config)?,
        })
    }

    pub fn container_client(&self, name: impl Into<String>) -> ContainerClient {
        ContainerClient::new(Arc::clone(&self.core), name.into())
    }
}
