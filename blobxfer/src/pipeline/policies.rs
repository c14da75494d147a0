//! Built-in pipeline policies.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, debug_span, Instrument};

use super::{Next, PipelineRequest, PipelineResult, Policy};
use crate::credential::Credential;

/// REST API version sent with every request and used for SAS tokens.
pub const API_VERSION: &str = "2019-12-12";

/// Stamps version, client request ID and user agent headers.
#[derive(Debug, Clone)]
pub struct RequestIdPolicy {
    user_agent: String,
}

impl Default for RequestIdPolicy {
    fn default() -> Self {
        Self {
            user_agent: format!("blobxfer/{}", crate::VERSION),
        }
    }
}

impl RequestIdPolicy {
    /// Uses a custom user agent.
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Policy for RequestIdPolicy {
    fn send<'a>(&'a self, mut request: PipelineRequest, next: Next<'a>) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            request.insert_header("x-ms-version", API_VERSION)?;
            request.insert_header("x-ms-client-request-id", &client_request_id())?;
            request.insert_header("user-agent", &self.user_agent)?;
            next.run(request).await
        })
    }
}

/// Random ID in UUID layout.
fn client_request_id() -> String {
    let bits: u128 = rand::rng().random();
    let hex = format!("{:032x}", bits);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Stamps `x-ms-date` and applies the credential.
#[derive(Debug, Clone)]
pub struct SigningPolicy {
    credential: Arc<Credential>,
}

impl SigningPolicy {
    pub fn new(credential: Arc<Credential>) -> Self {
        Self { credential }
    }
}

impl Policy for SigningPolicy {
    fn send<'a>(&'a self, mut request: PipelineRequest, next: Next<'a>) -> BoxFuture<'a, PipelineResult> {
        Box::pin(async move {
            let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            request.insert_header("x-ms-date", &date)?;
            self.credential.sign(&mut request)?;
            next.run(request).await
        })
    }
}

/// Wraps each attempt in a span and logs status and latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPolicy;

impl Policy for LoggingPolicy {
    fn send<'a>(&'a self, request: PipelineRequest, next: Next<'a>) -> BoxFuture<'a, PipelineResult> {
        let span = debug_span!(
            "http_request",
            method = %request.method,
            host = request.host(),
            path = request.url.path(),
            request_id = request.header("x-ms-client-request-id").unwrap_or_default(),
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let result = next.run(request).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(response) => debug!(
                        status = response.status.as_u16(),
                        error_code = response.error_code().unwrap_or_default(),
                        latency_ms,
                        "Response received"
                    ),
                    Err(error) => debug!(error = %error, latency_ms, "Request failed"),
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_id_layout() {
        let id = client_request_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert_ne!(id, client_request_id());
    }

    #[test]
    fn test_default_user_agent() {
        let policy = RequestIdPolicy::default();
        assert!(policy.user_agent.starts_with("blobxfer/"));
        assert_eq!(
            RequestIdPolicy::with_user_agent("custom").user_agent,
            "custom"
        );
    }
}
