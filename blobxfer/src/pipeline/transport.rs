//! HTTP transport abstraction for testability.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{StreamExt, TryStreamExt};

use super::{PipelineRequest, PipelineResponse, PipelineResult, ResponseBody};
use crate::error::RequestError;

/// Connection timeout used by [`ReqwestTransport::new`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends a single HTTP request.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling in-memory transports in tests.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: PipelineRequest) -> BoxFuture<'_, PipelineResult>;
}

/// Real transport implementation using reqwest.
///
/// Response bodies are streamed, so large downloads are never buffered here.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport with the default connection timeout.
    pub fn new() -> Result<Self, RequestError> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a transport with a custom connection timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RequestError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            connect_timeout,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: PipelineRequest) -> BoxFuture<'_, PipelineResult> {
        Box::pin(async move {
            let timeout = self.connect_timeout;
            let response = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, timeout))?;

            let status = response.status();
            let headers = response.headers().clone();
            let stream = response
                .bytes_stream()
                .map_err(move |e| map_reqwest_error(e, timeout))
                .boxed();

            Ok(PipelineResponse {
                status,
                headers,
                body: ResponseBody::Stream(stream),
            })
        })
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> RequestError {
    if error.is_timeout() {
        RequestError::Timeout(timeout)
    } else if error.is_builder() {
        RequestError::InvalidRequest(error.to_string())
    } else {
        RequestError::Network(error.to_string())
    }
}
