//! Queries port - the job table as seen by the dispatcher
//!
//! Implemented by `bobbin-pg` (PostgreSQL) and `impls::InMemoryQueries`.
//!
//! # 設計原則
//! - `dequeue` is the only way a job reaches a handler, and it must be atomic:
//!   claimed rows move to `picked` in the same statement that returns them,
//!   with skip-locked semantics, so no two concurrent callers (other manager
//!   processes included) ever receive the same active job.
//! - The manager trusts this contract and does not re-check it.
//! - `log_job` records a terminal status and may be called more than once for
//!   the same job and status without further effect.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Job, JobStatus, StorageError};

#[async_trait]
pub trait Queries: Send + Sync {
    /// Schema-capability check: does the queue table expose the `updated`
    /// column that stale-claim detection relies on?
    async fn has_updated_column(&self) -> Result<bool, StorageError>;

    /// Claim up to `batch_size` jobs whose entrypoint is in `entrypoints`.
    ///
    /// Returns jobs ordered by priority (highest first), then id. When
    /// `retry_timer` is set, jobs stuck in `picked` for longer than the timer
    /// are claimable again alongside queued ones.
    async fn dequeue(
        &self,
        batch_size: usize,
        entrypoints: &[String],
        retry_timer: Option<Duration>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Record the terminal status of a dispatched job.
    async fn log_job(&self, job: &Job, status: JobStatus) -> Result<(), StorageError>;
}
