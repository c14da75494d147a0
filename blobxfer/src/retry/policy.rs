//! Retry policy configuration.
//!
//! [`RetryPolicyConfig`] is created once per client and never changes. It
//! decides how many attempts a logical request gets, how long to wait between
//! them, and whether reads may be redirected to a secondary host.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use blobxfer::retry::{RetryPolicyConfig, RetryPolicyKind};
//!
//! let config = RetryPolicyConfig::default()
//!     .with_kind(RetryPolicyKind::Exponential)
//!     .with_max_tries(4)
//!     .with_retry_delay(Duration::from_millis(100))
//!     .with_max_retry_delay(Duration::from_secs(1))
//!     .with_jitter(0.0);
//!
//! assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
//! assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

use crate::error::{BlobError, BlobResult};

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default maximum number of attempts, including the first.
pub const DEFAULT_MAX_TRIES: u32 = 4;

/// Default base delay between attempts (4 seconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 4_000;

/// Default maximum delay between attempts (2 minutes).
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 120_000;

/// Default fraction of the computed delay added as random jitter.
pub const DEFAULT_JITTER: f64 = 0.1;

/// How the delay between attempts grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicyKind {
    /// Delay doubles after each failed attempt, up to the maximum delay.
    #[default]
    Exponential,

    /// Delay stays at the base delay for every retry.
    Fixed,
}

impl FromStr for RetryPolicyKind {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "fixed" | "linear" => Ok(Self::Fixed),
            other => Err(BlobError::InvalidConfig(format!(
                "unknown retry policy '{}' (expected exponential or fixed)",
                other
            ))),
        }
    }
}

impl fmt::Display for RetryPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Immutable retry configuration shared by every request of a client.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicyConfig {
    /// Backoff shape.
    pub kind: RetryPolicyKind,
    /// Maximum number of attempts (including the initial attempt).
    pub max_tries: u32,
    /// Base delay after the first failure.
    pub retry_delay: Duration,
    /// Upper bound on any single delay.
    pub max_retry_delay: Duration,
    /// Per-attempt timeout; an attempt exceeding it fails with a timeout.
    pub try_timeout: Option<Duration>,
    /// Overall time budget for one logical request, across all attempts.
    pub max_elapsed: Option<Duration>,
    /// Fraction of the computed delay added as uniform random jitter.
    pub jitter: f64,
    /// Read-only replica host used for alternate read attempts.
    pub secondary_host: Option<String>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            kind: RetryPolicyKind::Exponential,
            max_tries: DEFAULT_MAX_TRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_retry_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
            try_timeout: None,
            max_elapsed: None,
            jitter: DEFAULT_JITTER,
            secondary_host: None,
        }
    }
}

impl RetryPolicyConfig {
    /// A policy that never retries and never waits.
    pub fn no_retry() -> Self {
        Self {
            max_tries: 1,
            retry_delay: Duration::ZERO,
            max_retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Set the backoff shape.
    pub fn with_kind(mut self, kind: RetryPolicyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the maximum number of attempts.
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Set the base delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the maximum delay.
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_try_timeout(mut self, timeout: Duration) -> Self {
        self.try_timeout = Some(timeout);
        self
    }

    /// Set the overall time budget for a logical request.
    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Set the jitter fraction (0.0 disables jitter).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the secondary (read replica) host.
    pub fn with_secondary_host(mut self, host: impl Into<String>) -> Self {
        self.secondary_host = Some(host.into());
        self
    }

    /// Checks the invariants and normalises the base delay.
    ///
    /// The base delay and maximum delay must be both zero or both non-zero. A
    /// base delay larger than the maximum is clamped down to the maximum.
    pub fn validated(mut self) -> BlobResult<Self> {
        if self.max_tries == 0 {
            return Err(BlobError::InvalidConfig(
                "max_tries must be at least 1".to_string(),
            ));
        }
        if self.retry_delay.is_zero() != self.max_retry_delay.is_zero() {
            return Err(BlobError::InvalidConfig(
                "retry_delay and max_retry_delay must both be zero or both be non-zero"
                    .to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(BlobError::InvalidConfig(format!(
                "jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if matches!(self.try_timeout, Some(t) if t.is_zero()) {
            return Err(BlobError::InvalidConfig(
                "try_timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(host) = &self.secondary_host {
            if host.trim().is_empty() {
                return Err(BlobError::InvalidConfig(
                    "secondary_host must not be empty".to_string(),
                ));
            }
        }
        self.retry_delay = self.retry_delay.min(self.max_retry_delay);
        Ok(self)
    }

    /// Computes the backoff before the attempt following `attempt`, without
    /// jitter.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.kind {
            RetryPolicyKind::Fixed => self.retry_delay.min(self.max_retry_delay),
            RetryPolicyKind::Exponential => {
                // Saturate instead of overflowing for large attempt counts.
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.retry_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_retry_delay)
                    .min(self.max_retry_delay)
            }
        }
    }

    /// Computes the backoff including random jitter, capped at the maximum
    /// delay.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = base.mul_f64(rand::rng().random_range(0.0..self.jitter));
        (base + extra).min(self.max_retry_delay)
    }
}
