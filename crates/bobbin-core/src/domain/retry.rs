//! Retry policy: decides whether stale claims are handed out again.

use std::time::Duration;

/// What happens to a job that stays `picked` without a terminal status
/// (the manager that claimed it crashed, or its handler hangs).
///
/// Reclaiming is the only retry mechanism: jobs that end in `exception` are
/// not retried. There is no attempt counter and no backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// A picked job is never handed out again.
    #[default]
    Disabled,

    /// A picked job whose status is older than `after` is claimable again.
    ReclaimStale { after: Duration },
}

impl RetryPolicy {
    pub fn reclaim_after(after: Duration) -> Self {
        RetryPolicy::ReclaimStale { after }
    }

    /// The `retry_timer` argument handed to `Queries::dequeue`.
    pub fn retry_timer(&self) -> Option<Duration> {
        match self {
            RetryPolicy::Disabled => None,
            RetryPolicy::ReclaimStale { after } => Some(*after),
        }
    }
}
