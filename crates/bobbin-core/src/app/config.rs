//! QueueManagerConfig - knobs for one `run`

use std::time::Duration;

use crate::domain::{QueueError, RetryPolicy};

/// Default channel the dispatch loop LISTENs on.
pub const DEFAULT_CHANNEL: &str = "bobbin_channel";

/// Configuration handed to `QueueManager::run`.
///
/// # 使用例
/// ```ignore
/// let config = QueueManagerConfig::default()
///     .with_batch_size(20)
///     .with_dequeue_timeout(Duration::from_secs(5))
///     .with_retry(RetryPolicy::reclaim_after(Duration::from_secs(300)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueManagerConfig {
    /// How long the loop waits for a wake event before polling anyway.
    /// Also the worst-case latency of `stop()`.
    pub dequeue_timeout: Duration,

    /// Maximum jobs claimed per `dequeue` call.
    pub batch_size: usize,

    pub retry: RetryPolicy,

    /// Capacity of the wake queue. Events beyond it are dropped.
    pub wake_capacity: usize,

    /// Maximum blocking handlers running at once. `None` leaves the bound
    /// to the runtime's blocking pool.
    pub blocking_concurrency: Option<usize>,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(30),
            batch_size: 10,
            retry: RetryPolicy::Disabled,
            wake_capacity: 64,
            blocking_concurrency: None,
        }
    }
}

impl QueueManagerConfig {
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_wake_capacity(mut self, capacity: usize) -> Self {
        self.wake_capacity = capacity;
        self
    }

    pub fn with_blocking_concurrency(mut self, limit: usize) -> Self {
        self.blocking_concurrency = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.batch_size == 0 {
            return Err(QueueError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.dequeue_timeout.is_zero() {
            return Err(QueueError::Configuration(
                "dequeue_timeout must be greater than zero".to_string(),
            ));
        }
        if self.wake_capacity == 0 {
            return Err(QueueError::Configuration(
                "wake_capacity must be at least 1".to_string(),
            ));
        }
        if self.blocking_concurrency == Some(0) {
            return Err(QueueError::Configuration(
                "blocking_concurrency must be at least 1".to_string(),
            ));
        }
        if let RetryPolicy::ReclaimStale { after } = self.retry
            && after.is_zero()
        {
            return Err(QueueError::Configuration(
                "retry timer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
