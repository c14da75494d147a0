//! Per-request retry state.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Which endpoint an attempt is sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// The account's primary endpoint.
    Primary,
    /// The geo-replicated, read-only secondary endpoint.
    Secondary,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Where a single attempt should be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptTarget {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Endpoint role.
    pub location: Location,
    /// Host name to put in the request URL.
    pub host: String,
}

/// Mutable state threaded through the attempts of one logical request.
///
/// Created fresh for every logical request and dropped when it finishes.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    attempt: u32,
    secondary_has_404: bool,
    location: Location,
    host: String,
    deadline: Option<Instant>,
}

impl AttemptContext {
    /// Starts a context for a request whose first attempt targets `primary_host`.
    pub fn new(primary_host: impl Into<String>, budget: Option<Duration>) -> Self {
        Self {
            attempt: 1,
            secondary_has_404: false,
            location: Location::Primary,
            host: primary_host.into(),
            deadline: budget.map(|b| Instant::now() + b),
        }
    }

    /// Current 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the secondary already answered 404 for this request.
    pub fn secondary_has_404(&self) -> bool {
        self.secondary_has_404
    }

    /// Location targeted by the current attempt.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Host targeted by the current attempt.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Time left in the overall budget, or `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True once the overall budget is used up.
    pub fn budget_exhausted(&self) -> bool {
        matches!(self.remaining(), Some(r) if r.is_zero())
    }

    /// Records that the secondary returned 404. The flag never resets.
    pub fn mark_secondary_not_found(&mut self) {
        self.secondary_has_404 = true;
    }

    /// Snapshot of the current target.
    pub fn target(&self) -> AttemptTarget {
        AttemptTarget {
            attempt: self.attempt,
            location: self.location,
            host: self.host.clone(),
        }
    }

    /// Moves to the next attempt with the given target.
    pub(crate) fn advance(&mut self, location: Location, host: impl Into<String>) {
        self.attempt += 1;
        self.location = location;
        self.host = host.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_targets_primary() {
        let ctx = AttemptContext::new("acct.blob.core.windows.net", None);
        assert_eq!(ctx.attempt(), 1);
        assert_eq!(ctx.location(), Location::Primary);
        assert_eq!(ctx.host(), "acct.blob.core.windows.net");
        assert!(!ctx.secondary_has_404());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.budget_exhausted());
    }

    #[test]
    fn test_secondary_flag_is_sticky() {
        let mut ctx = AttemptContext::new("p", None);
        ctx.mark_secondary_not_found();
        ctx.advance(Location::Primary, "p");
        ctx.advance(Location::Primary, "p");
        assert!(ctx.secondary_has_404());
        assert_eq!(ctx.attempt(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_runs_out() {
        let ctx = AttemptContext::new("p", Some(Duration::from_secs(2)));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(ctx.budget_exhausted());
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::Primary.to_string(), "primary");
        assert_eq!(Location::Secondary.to_string(), "secondary");
    }
}
