//! Request pipeline.
//!
//! Every HTTP attempt passes through an ordered list of [`Policy`] values
//! before reaching the [`HttpTransport`]:
//!
//! ```text
//! request ─► RequestIdPolicy ─► SigningPolicy ─► LoggingPolicy ─► transport
//! ```
//!
//! Policies see one attempt each. Retrying is the job of the retry
//! orchestrator, which builds a fresh request for every attempt.

mod policies;
mod transport;

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::credential::Credential;
use crate::error::RequestError;

pub use policies::{LoggingPolicy, RequestIdPolicy, SigningPolicy, API_VERSION};
pub use transport::{HttpTransport, ReqwestTransport, DEFAULT_CONNECT_TIMEOUT};

#[cfg(test)]
pub(crate) use transport::mock;

/// Streaming response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, RequestError>>;

/// Result of sending one attempt through the pipeline.
pub type PipelineResult = Result<PipelineResponse, RequestError>;

/// Header carrying the service's error code on failed responses.
pub const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// One HTTP attempt.
#[derive(Clone, Debug)]
pub struct PipelineRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PipelineRequest {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Sets a header, replacing any existing value.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, RequestError> {
        self.insert_header(name, value)?;
        Ok(self)
    }

    /// Sets a header in place, replacing any existing value.
    ///
    /// `name` must be lowercase.
    pub fn insert_header(&mut self, name: &'static str, value: &str) -> Result<(), RequestError> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            RequestError::InvalidRequest(format!("invalid value for header {}: {}", name, e))
        })?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(())
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host the request is addressed to.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// Response body, either fully read or still streaming.
pub enum ResponseBody {
    Buffered(Bytes),
    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Response to one HTTP attempt.
#[derive(Debug)]
pub struct PipelineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl PipelineResponse {
    /// Creates a response with a buffered body.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(body),
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Header value parsed as an integer.
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }

    /// Service error code from `x-ms-error-code`.
    pub fn error_code(&self) -> Option<&str> {
        self.header(ERROR_CODE_HEADER)
    }

    /// Turns non-2xx responses into [`RequestError::Status`].
    pub fn error_for_status(self, host: &str) -> PipelineResult {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(RequestError::Status {
            status: self.status.as_u16(),
            code: self.error_code().map(str::to_string),
            host: host.to_string(),
        })
    }

    /// Reads a streaming body to the end.
    ///
    /// Errors while reading surface as network errors so the attempt can be
    /// retried.
    pub async fn buffer(self) -> PipelineResult {
        let body = match self.body {
            ResponseBody::Buffered(bytes) => bytes,
            ResponseBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                buf.freeze()
            }
        };
        Ok(Self {
            status: self.status,
            headers: self.headers,
            body: ResponseBody::Buffered(body),
        })
    }

    /// The body as bytes; streaming bodies yield empty bytes.
    ///
    /// Call [`buffer`](Self::buffer) first for streamed responses.
    pub fn bytes(&self) -> Bytes {
        match &self.body {
            ResponseBody::Buffered(bytes) => bytes.clone(),
            ResponseBody::Stream(_) => Bytes::new(),
        }
    }

    /// The body as a stream.
    pub fn into_stream(self) -> ByteStream {
        match self.body {
            ResponseBody::Buffered(bytes) => {
                futures::stream::once(async move { Ok(bytes) }).boxed()
            }
            ResponseBody::Stream(stream) => stream,
        }
    }
}

/// One step of the pipeline.
///
/// A policy may change the request, call `next`, and inspect the response.
pub trait Policy: Send + Sync + fmt::Debug {
    fn send<'a>(&'a self, request: PipelineRequest, next: Next<'a>) -> BoxFuture<'a, PipelineResult>;
}

/// The remaining policies plus the transport.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn HttpTransport,
}

impl<'a> Next<'a> {
    /// Passes `request` to the next policy, or to the transport at the end.
    pub fn run(self, request: PipelineRequest) -> BoxFuture<'a, PipelineResult> {
        match self.policies.split_first() {
            Some((policy, rest)) => policy.send(
                request,
                Next {
                    policies: rest,
                    transport: self.transport,
                },
            ),
            None => self.transport.send(request),
        }
    }
}

/// Ordered policies ending in a transport.
#[derive(Clone)]
pub struct Pipeline {
    policies: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds the standard pipeline: request IDs, signing, then logging.
    pub fn new(credential: Arc<Credential>, transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_policies(
            vec![
                Arc::new(RequestIdPolicy::default()),
                Arc::new(SigningPolicy::new(credential)),
                Arc::new(LoggingPolicy),
            ],
            transport,
        )
    }

    /// Builds a pipeline with a custom policy list.
    pub fn with_policies(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Sends one attempt through every policy and the transport.
    pub fn send(&self, request: PipelineRequest) -> BoxFuture<'_, PipelineResult> {
        Next {
            policies: &self.policies,
            transport: self.transport.as_ref(),
        }
        .run(request)
    }
}
