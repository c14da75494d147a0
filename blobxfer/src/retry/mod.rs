//! Request retry and failover.
//!
//! - [`RetryPolicyConfig`]: immutable backoff/attempt configuration
//! - [`AttemptContext`]: per-request mutable state (attempt count, secondary 404)
//! - [`RetryOrchestrator`]: runs a logical request as bounded attempts

mod context;
mod orchestrator;
mod policy;

pub use context::{AttemptContext, AttemptTarget, Location};
pub use orchestrator::{LogicalOperation, RetryOrchestrator};
pub use policy::{
    RetryPolicyConfig, RetryPolicyKind, DEFAULT_JITTER, DEFAULT_MAX_RETRY_DELAY_MS,
    DEFAULT_MAX_TRIES, DEFAULT_RETRY_DELAY_MS,
};
