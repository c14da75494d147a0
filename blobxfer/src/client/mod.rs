//! Blob service clients.
//!
//! Clients are cheap handles over a shared [`ClientCore`], which owns the
//! pipeline, the retry orchestrator and the transfer coordinator. Every
//! operation takes a `CancellationToken`; cancelling it stops retries,
//! in-flight attempts and outstanding chunks.

mod blob;
mod block_blob;
mod container;
mod service;

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::error::{BlobError, BlobResult, RequestError};
use crate::pipeline::{HttpTransport, Pipeline, PipelineRequest, PipelineResponse, ReqwestTransport};
use crate::retry::{AttemptTarget, LogicalOperation, RetryOrchestrator, RetryPolicyConfig};
use crate::transfer::ChunkedTransferCoordinator;

pub use blob::{BlobClient, BlobProperties, CopyOutcome, CopyPollOperation, CopyState, CopyStatus};
pub use block_blob::{BlockBlobClient, UploadResponse};
pub use container::ContainerClient;
pub use service::BlobServiceClient;

/// State shared by every client created from one [`BlobServiceClient`].
pub(crate) struct ClientCore {
    pipeline: Pipeline,
    retry: RetryOrchestrator,
    transfer: ChunkedTransferCoordinator,
    endpoint: Url,
    sas_token: Option<String>,
}

impl fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCore")
            .field("endpoint", &self.endpoint.as_str())
            .field("retry", &self.retry)
            .field("transfer", &self.transfer)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl ClientCore {
    pub(crate) fn new(config: ClientConfig) -> BlobResult<Arc<Self>> {
        let ClientConfig {
            endpoint,
            credential,
            sas_token,
            retry,
            transfer,
            transport,
        } = config;

        let host = endpoint
            .host_str()
            .ok_or_else(|| BlobError::InvalidConfig(format!("endpoint '{}' has no host", endpoint)))?
            .to_string();

        if sas_token.is_some() && !matches!(credential, Credential::Anonymous) {
            return Err(BlobError::InvalidConfig(
                "a SAS token cannot be combined with another credential".to_string(),
            ));
        }

        let transport: Arc<dyn HttpTransport> = match transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new().map_err(|e| BlobError::InvalidConfig(e.to_string()))?,
            ),
        };

        let retry = RetryOrchestrator::new(retry, host)?;
        info!(
            endpoint = %endpoint,
            secondary = retry.config().secondary_host.as_deref().unwrap_or("none"),
            max_tries = retry.config().max_tries,
            policy = %retry.config().kind,
            "Blob client created"
        );

        Ok(Arc::new(Self {
            pipeline: Pipeline::new(Arc::new(credential), transport),
            retry,
            transfer: ChunkedTransferCoordinator::new(transfer),
            endpoint,
            sas_token,
        }))
    }

    pub(crate) fn primary_host(&self) -> &str {
        self.retry.primary_host()
    }

    pub(crate) fn transfer(&self) -> &ChunkedTransferCoordinator {
        &self.transfer
    }

    pub(crate) fn retry_config(&self) -> &RetryPolicyConfig {
        self.retry.config()
    }

    /// URL of `container` (and `blob`) on `host`, with operation query
    /// parameters appended after any SAS token.
    pub(crate) fn url(
        &self,
        host: &str,
        container: &str,
        blob: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<Url, RequestError> {
        let mut url = self.endpoint.clone();
        if url.host_str() != Some(host) {
            url.set_host(Some(host))
                .map_err(|e| RequestError::InvalidRequest(format!("invalid host '{}': {}", host, e)))?;
        }

        // Names are pushed as segments so '%' is escaped; '/' in a blob name
        // stays a separator.
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RequestError::InvalidRequest(format!("endpoint '{}' cannot hold a path", self.endpoint))
            })?;
            segments.pop_if_empty().push(container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }

        url.set_query(self.sas_token.as_deref());
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Runs one logical request through the retry orchestrator.
    ///
    /// `build` creates the request for each attempt's target. With
    /// `buffered`, the body is read inside the attempt so a broken body is
    /// retried like any other network error.
    pub(crate) async fn send<B>(
        &self,
        op: &LogicalOperation,
        cancel: &CancellationToken,
        buffered: bool,
        build: B,
    ) -> BlobResult<PipelineResponse>
    where
        B: Fn(&AttemptTarget) -> Result<PipelineRequest, RequestError>,
    {
        self.retry
            .execute(op, cancel, |target| {
                let request = build(&target);
                async move {
                    let response = self
                        .pipeline
                        .send(request?)
                        .await?
                        .error_for_status(&target.host)?;
                    if buffered {
                        response.buffer().await
                    } else {
                        Ok(response)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for client unit tests.

    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    use reqwest::StatusCode;

    use crate::config::ClientConfig;
    use crate::error::RequestError;
    use crate::pipeline::mock::MockTransport;
    use crate::pipeline::{PipelineRequest, PipelineResponse, PipelineResult};
    use crate::retry::RetryPolicyConfig;
    use crate::transfer::TransferOptions;

    use super::BlobServiceClient;

    pub(crate) fn response(status: u16, headers: &[(&'static str, &str)], body: &[u8]) -> PipelineResult {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(HeaderName::from_static(name), HeaderValue::from_str(value).unwrap());
        }
        Ok(PipelineResponse::new(
            StatusCode::from_u16(status).unwrap(),
            map,
            Bytes::copy_from_slice(body),
        ))
    }

    pub(crate) fn service(
        handler: impl Fn(&PipelineRequest) -> Result<PipelineResponse, RequestError> + Send + Sync + 'static,
    ) -> (BlobServiceClient, Arc<MockTransport>) {
        service_with(TransferOptions::default(), handler)
    }

    pub(crate) fn service_with(
        transfer: TransferOptions,
        handler: impl Fn(&PipelineRequest) -> Result<PipelineResponse, RequestError> + Send + Sync + 'static,
    ) -> (BlobServiceClient, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(handler));
        let config = ClientConfig::new("https://acct.blob.core.windows.net")
            .unwrap()
            .with_retry(
                RetryPolicyConfig::default()
                    .with_retry_delay(Duration::from_millis(1))
                    .with_max_retry_delay(Duration::from_millis(2))
                    .with_jitter(0.0),
            )
            .with_transfer(transfer)
            .with_transport(transport.clone());
        (BlobServiceClient::new(config).unwrap(), transport)
    }
}
