//! Retry orchestration with primary/secondary failover.
//!
//! The orchestrator runs one logical request as a sequence of attempts. Each
//! attempt is handed an [`AttemptTarget`] naming the host to use; the
//! orchestrator classifies the outcome, waits out the backoff and picks the
//! next target.
//!
//! # Target selection
//!
//! ```text
//! attempt:   1        2          3        4          5 ...
//! target:    primary  secondary  primary  secondary  primary
//!                     (only while the request is read-only, a secondary is
//!                      configured and the secondary has not answered 404)
//! ```
//!
//! # Classification
//!
//! | failure                      | outcome                                  |
//! |------------------------------|------------------------------------------|
//! | network, timeout, 5xx        | retry                                    |
//! | 404 from the secondary       | retry; secondary disabled for the request |
//! | other 4xx, signing failure   | surface immediately                      |
//! | cancellation                 | surface immediately as cancellation      |

use std::borrow::Cow;
use std::future::Future;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{AttemptContext, AttemptTarget, Location};
use super::policy::RetryPolicyConfig;
use crate::error::{BlobError, BlobResult, RequestError};

/// Description of one logical HTTP operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicalOperation {
    name: Cow<'static, str>,
    method: Method,
    read_only: bool,
}

impl LogicalOperation {
    /// Creates an operation; GET and HEAD are treated as read-only.
    pub fn new(name: impl Into<Cow<'static, str>>, method: Method) -> Self {
        let read_only = method == Method::GET || method == Method::HEAD;
        Self {
            name: name.into(),
            method,
            read_only,
        }
    }

    /// Shorthand for a read-only GET operation.
    pub fn read(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Method::GET)
    }

    /// Shorthand for a PUT operation.
    pub fn write(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, Method::PUT)
    }

    /// Operation name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Whether the operation may be served by the secondary.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Executes logical requests under a [`RetryPolicyConfig`].
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    config: RetryPolicyConfig,
    primary_host: String,
}

impl RetryOrchestrator {
    /// Creates an orchestrator after validating `config`.
    pub fn new(config: RetryPolicyConfig, primary_host: impl Into<String>) -> BlobResult<Self> {
        Ok(Self {
            config: config.validated()?,
            primary_host: primary_host.into(),
        })
    }

    /// The validated retry configuration.
    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Host used for primary attempts.
    pub fn primary_host(&self) -> &str {
        &self.primary_host
    }

    /// Runs `attempt_fn` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires.
    ///
    /// Cancellation always wins: it is checked before every attempt and
    /// raced against both the attempt and the backoff sleep.
    pub async fn execute<T, F, Fut>(
        &self,
        op: &LogicalOperation,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> BlobResult<T>
    where
        F: FnMut(AttemptTarget) -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut ctx = AttemptContext::new(self.primary_host.clone(), self.config.max_elapsed);

        loop {
            if cancel.is_cancelled() {
                return Err(BlobError::cancelled(op.name()));
            }

            let error = match self.run_attempt(attempt_fn(ctx.target()), cancel).await {
                Ok(value) => {
                    if ctx.attempt() > 1 {
                        debug!(
                            operation = op.name(),
                            attempts = ctx.attempt(),
                            location = %ctx.location(),
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(RequestError::Cancelled) => return Err(BlobError::cancelled(op.name())),
                Err(error) => error,
            };

            if !classify(&error, &mut ctx) {
                debug!(
                    operation = op.name(),
                    attempt = ctx.attempt(),
                    error = %error,
                    "Request failed with non-retryable error"
                );
                return Err(self.failure(op, &ctx, error));
            }

            if ctx.attempt() >= self.config.max_tries || ctx.budget_exhausted() {
                warn!(
                    operation = op.name(),
                    attempts = ctx.attempt(),
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(self.failure(op, &ctx, error));
            }

            let mut delay = self.config.jittered_delay_for_attempt(ctx.attempt());
            if let Some(remaining) = ctx.remaining() {
                delay = delay.min(remaining);
            }
            let (location, host) = self.next_target(op, &ctx);

            warn!(
                operation = op.name(),
                attempt = ctx.attempt(),
                next_location = %location,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BlobError::cancelled(op.name())),
                _ = tokio::time::sleep(delay) => {}
            }

            ctx.advance(location, host);
        }
    }

    /// Runs one attempt under the per-attempt timeout, racing cancellation.
    async fn run_attempt<T, Fut>(
        &self,
        attempt: Fut,
        cancel: &CancellationToken,
    ) -> Result<T, RequestError>
    where
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let timed = async {
            match self.config.try_timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or(Err(RequestError::Timeout(limit))),
                None => attempt.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RequestError::Cancelled),
            result = timed => result,
        }
    }

    /// Whether the next attempts of this request may go to the secondary.
    fn secondary_eligible(&self, op: &LogicalOperation, ctx: &AttemptContext) -> bool {
        op.is_read_only() && self.config.secondary_host.is_some() && !ctx.secondary_has_404()
    }

    /// Picks the target for the attempt after the current one.
    fn next_target(&self, op: &LogicalOperation, ctx: &AttemptContext) -> (Location, String) {
        let next_attempt = ctx.attempt() + 1;
        match &self.config.secondary_host {
            Some(secondary) if next_attempt % 2 == 0 && self.secondary_eligible(op, ctx) => {
                (Location::Secondary, secondary.clone())
            }
            _ => (Location::Primary, self.primary_host.clone()),
        }
    }

    fn failure(&self, op: &LogicalOperation, ctx: &AttemptContext, source: RequestError) -> BlobError {
        BlobError::Request {
            operation: op.name().to_string(),
            attempts: ctx.attempt(),
            source,
        }
    }
}

/// Decides whether a failed attempt may be retried.
///
/// A 404 from the secondary is recorded in `ctx` so later attempts stay on the
/// primary.
fn classify(error: &RequestError, ctx: &mut AttemptContext) -> bool {
    match error {
        RequestError::Network(_) | RequestError::Timeout(_) => true,
        RequestError::Status { status, .. } if *status >= 500 => true,
        RequestError::Status { status: 404, .. } if ctx.location() == Location::Secondary => {
            ctx.mark_secondary_not_found();
            true
        }
        RequestError::Status { .. }
        | RequestError::Signing(_)
        | RequestError::InvalidRequest(_)
        | RequestError::Cancelled => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicyKind;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    const PRIMARY: &str = "acct.blob.core.windows.net";
    const SECONDARY: &str = "acct-secondary.blob.core.windows.net";

    #[derive(Debug, Clone)]
    struct Observed {
        at: Instant,
        location: Location,
        host: String,
    }

    fn config(max_tries: u32) -> RetryPolicyConfig {
        RetryPolicyConfig::default()
            .with_max_tries(max_tries)
            .with_retry_delay(Duration::from_millis(100))
            .with_max_retry_delay(Duration::from_millis(1_000))
            .with_jitter(0.0)
    }

    fn orchestrator(config: RetryPolicyConfig) -> RetryOrchestrator {
        RetryOrchestrator::new(config, PRIMARY).unwrap()
    }

    /// Runs `op` with an attempt function that answers from `responses`
    /// (repeating the last one) and records every attempt.
    async fn run(
        orch: &RetryOrchestrator,
        op: LogicalOperation,
        cancel: &CancellationToken,
        responses: Vec<Result<u32, RequestError>>,
    ) -> (BlobResult<u32>, Vec<Observed>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(responses);
        let result = orch
            .execute(&op, cancel, |target| {
                let log = Arc::clone(&log);
                let responses = Arc::clone(&responses);
                async move {
                    log.lock().unwrap().push(Observed {
                        at: Instant::now(),
                        location: target.location,
                        host: target.host.clone(),
                    });
                    let idx = (target.attempt as usize - 1).min(responses.len() - 1);
                    responses[idx].clone()
                }
            })
            .await;
        let observed = log.lock().unwrap().clone();
        (result, observed)
    }

    fn gaps(observed: &[Observed]) -> Vec<Duration> {
        observed.windows(2).map(|w| w[1].at - w[0].at).collect()
    }

    /// Timer ticks are 1ms, so allow a millisecond or two of slack.
    fn assert_gaps(observed: &[Observed], expected_ms: &[u64]) {
        let actual = gaps(observed);
        assert_eq!(actual.len(), expected_ms.len(), "gaps: {:?}", actual);
        for (gap, want) in actual.iter().zip(expected_ms) {
            let want = Duration::from_millis(*want);
            assert!(
                *gap >= want && *gap <= want + Duration::from_millis(2),
                "gap {:?} not close to {:?}",
                gap,
                want
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_max_tries_with_exponential_delays() {
        let orch = orchestrator(config(4));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::status(503, PRIMARY))],
        )
        .await;

        assert_eq!(observed.len(), 4);
        assert_gaps(&observed, &[100, 200, 400]);
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), Some(4));
        assert_eq!(err.request_error().and_then(|e| e.status_code()), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_policy_uses_constant_delay() {
        let orch = orchestrator(config(3).with_kind(RetryPolicyKind::Fixed));
        let (_, observed) = run(
            &orch,
            LogicalOperation::write("PutBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::Network("reset".into()))],
        )
        .await;

        assert_gaps(&observed, &[100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_makes_one_attempt() {
        let orch = orchestrator(config(4));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::status(403, PRIMARY))],
        )
        .await;

        assert_eq!(observed.len(), 1);
        assert_eq!(result.unwrap_err().attempts(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_404_is_not_retried() {
        let orch = orchestrator(config(4).with_secondary_host(SECONDARY));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::status(404, PRIMARY))],
        )
        .await;

        assert_eq!(observed.len(), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let orch = orchestrator(config(4));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![
                Err(RequestError::Timeout(Duration::from_secs(30))),
                Err(RequestError::status(500, PRIMARY)),
                Ok(7),
            ],
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(observed.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_alternate_between_primary_and_secondary() {
        let orch = orchestrator(config(6).with_secondary_host(SECONDARY));
        let (_, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::status(500, PRIMARY))],
        )
        .await;

        let locations: Vec<_> = observed.iter().map(|o| o.location).collect();
        assert_eq!(
            locations,
            vec![
                Location::Primary,
                Location::Secondary,
                Location::Primary,
                Location::Secondary,
                Location::Primary,
                Location::Secondary
            ]
        );
        assert_eq!(observed[1].host, SECONDARY);
        assert_eq!(observed[2].host, PRIMARY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_404_pins_remaining_attempts_to_primary() {
        let orch = orchestrator(config(5).with_secondary_host(SECONDARY));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![
                Err(RequestError::status(503, PRIMARY)),
                Err(RequestError::status(404, SECONDARY)),
                Err(RequestError::status(503, PRIMARY)),
            ],
        )
        .await;

        let locations: Vec<_> = observed.iter().map(|o| o.location).collect();
        assert_eq!(
            locations,
            vec![
                Location::Primary,
                Location::Secondary,
                Location::Primary,
                Location::Primary,
                Location::Primary
            ]
        );
        assert_eq!(result.unwrap_err().attempts(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_never_use_secondary() {
        let orch = orchestrator(config(4).with_secondary_host(SECONDARY));
        let (_, observed) = run(
            &orch,
            LogicalOperation::write("StageBlock"),
            &CancellationToken::new(),
            vec![Err(RequestError::status(500, PRIMARY))],
        )
        .await;

        assert_eq!(observed.len(), 4);
        assert!(observed.iter().all(|o| o.location == Location::Primary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_makes_no_attempt() {
        let orch = orchestrator(config(4));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &cancel,
            vec![Ok(1)],
        )
        .await;

        assert!(observed.is_empty());
        assert!(matches!(result, Err(BlobError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let orch = orchestrator(
            config(4)
                .with_retry_delay(Duration::from_secs(10))
                .with_max_retry_delay(Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &cancel,
            vec![Err(RequestError::status(503, PRIMARY))],
        )
        .await;

        assert_eq!(observed.len(), 1);
        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.attempts().is_none());
        assert!(Instant::now() - started < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attempt_is_not_retried() {
        let orch = orchestrator(config(4));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::Cancelled)],
        )
        .await;

        assert_eq!(observed.len(), 1);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_timeout_turns_slow_attempts_into_timeouts() {
        let orch = orchestrator(config(2).with_try_timeout(Duration::from_secs(1)));
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&attempts);

        let result: BlobResult<()> = orch
            .execute(
                &LogicalOperation::read("GetBlob"),
                &CancellationToken::new(),
                move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        *counter.lock().unwrap() += 1;
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    }
                },
            )
            .await;

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(
            result.unwrap_err().request_error(),
            Some(&RequestError::Timeout(Duration::from_secs(1)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_stops_retrying() {
        let orch = orchestrator(config(10).with_max_elapsed(Duration::from_millis(250)));
        let (result, observed) = run(
            &orch,
            LogicalOperation::read("GetBlob"),
            &CancellationToken::new(),
            vec![Err(RequestError::status(500, PRIMARY))],
        )
        .await;

        // 0ms, 100ms, then the 200ms delay is cut to the 150ms left.
        assert_eq!(observed.len(), 3);
        assert_gaps(&observed, &[100, 150]);
        assert_eq!(result.unwrap_err().attempts(), Some(3));
    }

    #[test]
    fn test_logical_operation_read_only() {
        assert!(LogicalOperation::new("GetProperties", Method::HEAD).is_read_only());
        assert!(LogicalOperation::read("GetBlob").is_read_only());
        assert!(!LogicalOperation::write("PutBlob").is_read_only());
        assert!(!LogicalOperation::new("DeleteBlob", Method::DELETE).is_read_only());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(RetryOrchestrator::new(config(0), PRIMARY).is_err());
    }
}
