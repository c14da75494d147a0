//! Polling for long-running server-side operations.
//!
//! [`PollState`] is a small state machine driven by observations of the
//! remote operation. [`Poller`] fetches observations on an interval until a
//! terminal state is reached or the caller cancels, in which case the remote
//! operation is asked to stop.

use std::mem;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BlobError, BlobResult};

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What one poll of the remote operation reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollObservation<T> {
    /// Still running, with an optional progress string such as `"512/1024"`.
    Pending { progress: Option<String> },
    /// Finished successfully.
    Succeeded(T),
    /// Finished with a failure.
    Failed(String),
    /// Stopped by an abort request.
    Aborted,
}

/// State of a long-running operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollState<T> {
    NotStarted,
    InProgress { progress: Option<String> },
    Succeeded(T),
    Failed(String),
    Cancelled,
}

impl<T> PollState<T> {
    /// True for `Succeeded`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled)
    }

    /// Applies an observation. Terminal states never change.
    pub fn advance(self, observation: PollObservation<T>) -> Self {
        if self.is_terminal() {
            return self;
        }
        match observation {
            PollObservation::Pending { progress } => Self::InProgress { progress },
            PollObservation::Succeeded(value) => Self::Succeeded(value),
            PollObservation::Failed(reason) => Self::Failed(reason),
            PollObservation::Aborted => Self::Cancelled,
        }
    }
}

/// A remote operation that can be observed and aborted.
pub trait PollOperation: Send + Sync {
    type Output: Send;

    /// Fetches the current status.
    fn poll<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, BlobResult<PollObservation<Self::Output>>>;

    /// Asks the service to stop the operation.
    fn cancel(&self) -> BoxFuture<'_, BlobResult<()>>;
}

/// Drives a [`PollOperation`] to completion.
pub struct Poller<O: PollOperation> {
    operation: O,
    state: PollState<O::Output>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<O: PollOperation> Poller<O> {
    /// Starts polling from `state`, which may already be terminal.
    pub fn new(operation: O, state: PollState<O::Output>, cancel: CancellationToken) -> Self {
        Self {
            operation,
            state,
            interval: DEFAULT_POLL_INTERVAL,
            cancel,
        }
    }

    /// Set the delay between polls.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Current state.
    pub fn state(&self) -> &PollState<O::Output> {
        &self.state
    }

    /// The operation being polled.
    pub fn operation(&self) -> &O {
        &self.operation
    }

    /// Polls once unless the state is already terminal.
    ///
    /// If the caller cancelled, the remote operation is aborted and
    /// `BlobError::Cancelled` is returned.
    pub async fn poll_once(&mut self) -> BlobResult<&PollState<O::Output>> {
        if self.state.is_terminal() {
            return Ok(&self.state);
        }
        if self.cancel.is_cancelled() {
            return Err(self.abort().await);
        }

        let observation = self.operation.poll(&self.cancel).await;
        let observation = match observation {
            Ok(observation) => observation,
            Err(e) if e.is_cancelled() => return Err(self.abort().await),
            Err(e) => return Err(e),
        };

        let state = mem::replace(&mut self.state, PollState::NotStarted);
        self.state = state.advance(observation);
        debug!(state = ?StateName::of(&self.state), "Polled operation");
        Ok(&self.state)
    }

    /// Polls until the operation finishes, sleeping `interval` between polls.
    pub async fn poll_until_done(mut self) -> BlobResult<O::Output> {
        loop {
            self.poll_once().await?;
            match mem::replace(&mut self.state, PollState::NotStarted) {
                PollState::Succeeded(value) => return Ok(value),
                PollState::Failed(reason) => return Err(BlobError::CopyFailed { reason }),
                PollState::Cancelled => {
                    return Err(BlobError::CopyFailed {
                        reason: "operation was aborted".to_string(),
                    })
                }
                state => self.state = state,
            }

            if sleep_or_cancel(self.interval, &self.cancel).await {
                return Err(self.abort().await);
            }
        }
    }

    async fn abort(&mut self) -> BlobError {
        warn!("Polling cancelled, aborting remote operation");
        if let Err(e) = self.operation.cancel().await {
            warn!(error = %e, "Failed to abort remote operation");
        }
        self.state = PollState::Cancelled;
        BlobError::cancelled("Poll")
    }
}

/// Returns true if `cancel` fired before `interval` elapsed.
async fn sleep_or_cancel(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(interval) => false,
    }
}

/// State label for logs.
#[derive(Debug)]
enum StateName {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl StateName {
    fn of<T>(state: &PollState<T>) -> Self {
        match state {
            PollState::NotStarted => Self::NotStarted,
            PollState::InProgress { .. } => Self::InProgress,
            PollState::Succeeded(_) => Self::Succeeded,
            PollState::Failed(_) => Self::Failed,
            PollState::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        observations: Mutex<VecDeque<PollObservation<u32>>>,
        polls: AtomicUsize,
        aborts: AtomicUsize,
    }

    impl Scripted {
        fn new(observations: Vec<PollObservation<u32>>) -> Self {
            Self {
                observations: Mutex::new(observations.into()),
                polls: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
            }
        }
    }

    impl PollOperation for Scripted {
        type Output = u32;

        fn poll<'a>(
            &'a self,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, BlobResult<PollObservation<u32>>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .observations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PollObservation::Pending { progress: None });
            Box::pin(async move { Ok(next) })
        }

        fn cancel(&self) -> BoxFuture<'_, BlobResult<()>> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn pending(progress: &str) -> PollObservation<u32> {
        PollObservation::Pending {
            progress: Some(progress.to_string()),
        }
    }

    #[test]
    fn test_transitions() {
        let state = PollState::<u32>::NotStarted.advance(pending("1/4"));
        assert_eq!(
            state,
            PollState::InProgress {
                progress: Some("1/4".to_string())
            }
        );

        let state = state.advance(PollObservation::Succeeded(7));
        assert_eq!(state, PollState::Succeeded(7));

        // Terminal states absorb further observations.
        assert_eq!(state.advance(PollObservation::Failed("x".into())), PollState::Succeeded(7));
        assert_eq!(
            PollState::<u32>::NotStarted.advance(PollObservation::Aborted),
            PollState::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_done_succeeds() {
        let op = Scripted::new(vec![pending("1/3"), pending("2/3"), PollObservation::Succeeded(3)]);
        let poller = Poller::new(op, PollState::NotStarted, CancellationToken::new())
            .with_interval(Duration::from_millis(10));

        assert_eq!(poller.poll_until_done().await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_maps_to_copy_failed() {
        let op = Scripted::new(vec![PollObservation::Failed("source gone".into())]);
        let err = Poller::new(op, PollState::NotStarted, CancellationToken::new())
            .poll_until_done()
            .await
            .unwrap_err();

        assert!(matches!(err, BlobError::CopyFailed { reason } if reason == "source gone"));
    }

    #[tokio::test]
    async fn test_already_terminal_does_not_poll() {
        let op = Scripted::new(vec![]);
        let mut poller = Poller::new(op, PollState::Succeeded(1), CancellationToken::new());

        assert_eq!(poller.poll_once().await.unwrap(), &PollState::Succeeded(1));
        assert_eq!(poller.operation().polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_remote_operation() {
        let cancel = CancellationToken::new();
        let op = Scripted::new(vec![]);
        let mut poller = Poller::new(op, PollState::NotStarted, cancel.clone())
            .with_interval(Duration::from_secs(1));

        poller.poll_once().await.unwrap();
        cancel.cancel();

        let err = poller.poll_once().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(poller.state(), &PollState::Cancelled);
        assert_eq!(poller.operation().aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let cancel = CancellationToken::new();
        let poller = Poller::new(Scripted::new(vec![]), PollState::NotStarted, cancel.clone())
            .with_interval(Duration::from_secs(60));

        let handle = tokio::spawn(poller.poll_until_done());
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
