//! InMemoryQueries - 開発・テスト用のジョブテーブル
//!
//! Honors the same contract as the PostgreSQL adapter:
//! - `dequeue` moves jobs to `picked` under one lock, so a job is never handed
//!   to two callers (the in-memory equivalent of `FOR UPDATE SKIP LOCKED`)
//! - with a retry timer, jobs whose `status_at` is older than the timer are
//!   claimable again
//! - `log_job` removes the job from the table and appends to the log; a job
//!   no longer in the table is ignored, so only the first terminal status counts
//!
//! It also records what the manager did (dequeue calls, batch sizes, logged
//! statuses) and can inject failures, which is what the tests lean on.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobId, JobStatus, StorageError};
use crate::impls::InMemoryNotifier;
use crate::ports::Queries;

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub picked: usize,
    pub successful: usize,
    pub exception: usize,
}

#[derive(Default)]
struct State {
    /// Queue table (jobs without a terminal status).
    jobs: BTreeMap<JobId, Job>,

    /// Log table, in the order statuses were recorded.
    log: Vec<(JobId, JobStatus)>,

    next_id: i64,

    /// Size of every batch returned by `dequeue`, including empty ones.
    dequeue_sizes: Vec<usize>,

    has_updated_column: bool,
    fail_next_dequeue: bool,
    fail_next_log: bool,
}

/// In-memory queue table.
pub struct InMemoryQueries {
    state: Mutex<State>,
    notifier: Option<(InMemoryNotifier, String)>,
}

impl InMemoryQueries {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                has_updated_column: true,
                ..State::default()
            }),
            notifier: None,
        }
    }

    /// Publish a notification on `channel` for every enqueued job, like a
    /// trigger on the queue table would.
    pub fn with_notifier(mut self, notifier: InMemoryNotifier, channel: impl Into<String>) -> Self {
        self.notifier = Some((notifier, channel.into()));
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, entrypoint: &str, payload: Option<Vec<u8>>) -> JobId {
        self.enqueue_with_priority(entrypoint, payload, 0)
    }

    pub fn enqueue_with_priority(
        &self,
        entrypoint: &str,
        payload: Option<Vec<u8>>,
        priority: i32,
    ) -> JobId {
        let id = {
            let mut state = self.lock();
            let id = JobId::new(state.next_id);
            state.next_id += 1;
            state
                .jobs
                .insert(id, Job::queued(id, entrypoint, payload).with_priority(priority));
            id
        };
        if let Some((notifier, channel)) = &self.notifier {
            notifier.notify(channel, entrypoint);
        }
        id
    }

    /// Pretend a picked job was claimed `age` ago.
    pub fn age_picked(&self, id: JobId, age: Duration) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(&id)
            && job.status == JobStatus::Picked
        {
            let at = Utc::now() - chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
            job.picked_at = Some(at);
            job.status_at = at;
        }
    }

    pub fn set_updated_column(&self, present: bool) {
        self.lock().has_updated_column = present;
    }

    pub fn fail_next_dequeue(&self) {
        self.lock().fail_next_dequeue = true;
    }

    pub fn fail_next_log(&self) {
        self.lock().fail_next_log = true;
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.get(&id).cloned()
    }

    /// Statuses recorded by `log_job`, in order.
    pub fn logged(&self) -> Vec<(JobId, JobStatus)> {
        self.lock().log.clone()
    }

    pub fn dequeue_calls(&self) -> usize {
        self.lock().dequeue_sizes.len()
    }

    pub fn dequeue_sizes(&self) -> Vec<usize> {
        self.lock().dequeue_sizes.clone()
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.lock();
        let mut counts = QueueCounts::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Picked => counts.picked += 1,
                JobStatus::Successful | JobStatus::Exception => {}
            }
        }
        for (_, status) in &state.log {
            match status {
                JobStatus::Successful => counts.successful += 1,
                JobStatus::Exception => counts.exception += 1,
                JobStatus::Queued | JobStatus::Picked => {}
            }
        }
        counts
    }
}

impl Default for InMemoryQueries {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queries for InMemoryQueries {
    async fn has_updated_column(&self) -> Result<bool, StorageError> {
        Ok(self.lock().has_updated_column)
    }

    async fn dequeue(
        &self,
        batch_size: usize,
        entrypoints: &[String],
        retry_timer: Option<Duration>,
    ) -> Result<Vec<Job>, StorageError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_dequeue) {
            state.dequeue_sizes.push(0);
            return Err(StorageError::Backend("dequeue failed".to_string()));
        }

        let now = Utc::now();
        let stale_before = retry_timer
            .and_then(|timer| chrono::Duration::from_std(timer).ok())
            .map(|timer| now - timer);

        let mut candidates: Vec<&Job> = state
            .jobs
            .values()
            .filter(|job| entrypoints.iter().any(|e| e == &job.entrypoint))
            .filter(|job| match job.status {
                JobStatus::Queued => true,
                JobStatus::Picked => stale_before.is_some_and(|before| job.status_at < before),
                JobStatus::Successful | JobStatus::Exception => false,
            })
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        let ids: Vec<JobId> = candidates.iter().take(batch_size).map(|job| job.id).collect();

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = state.jobs.get_mut(&id)
                && job.mark_picked(now)
            {
                batch.push(job.clone());
            }
        }
        state.dequeue_sizes.push(batch.len());
        Ok(batch)
    }

    async fn log_job(&self, job: &Job, status: JobStatus) -> Result<(), StorageError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_log) {
            return Err(StorageError::Backend("log_job failed".to_string()));
        }
        // 最初の終了状態だけが残る
        if state.jobs.remove(&job.id).is_none() {
            return Ok(());
        }
        state.log.push((job.id, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn dequeue_claims_in_priority_order() {
        let queries = InMemoryQueries::new();
        let low = queries.enqueue_with_priority("a", None, 0);
        let high = queries.enqueue_with_priority("a", None, 5);
        let low2 = queries.enqueue_with_priority("a", None, 0);

        let batch = queries.dequeue(10, &names(&["a"]), None).await.unwrap();
        let ids: Vec<JobId> = batch.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high, low, low2]);
        assert!(batch.iter().all(|j| j.status == JobStatus::Picked));
        assert!(batch.iter().all(|j| j.picked_at.is_some()));
    }

    #[tokio::test]
    async fn dequeue_filters_by_entrypoint_and_batch_size() {
        let queries = InMemoryQueries::new();
        for _ in 0..3 {
            queries.enqueue("a", None);
            queries.enqueue("b", None);
        }

        let batch = queries.dequeue(2, &names(&["a"]), None).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|j| j.entrypoint == "a"));
        assert_eq!(queries.counts().queued, 4);
        assert_eq!(queries.counts().picked, 2);
    }

    #[tokio::test]
    async fn picked_jobs_are_not_handed_out_twice() {
        let queries = InMemoryQueries::new();
        queries.enqueue("a", None);

        let first = queries.dequeue(10, &names(&["a"]), None).await.unwrap();
        let second = queries
            .dequeue(10, &names(&["a"]), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(queries.dequeue_sizes(), vec![1, 0]);
    }

    #[tokio::test]
    async fn stale_picked_jobs_are_reclaimed_with_retry_timer() {
        let queries = InMemoryQueries::new();
        let id = queries.enqueue("a", None);
        queries.dequeue(10, &names(&["a"]), None).await.unwrap();
        queries.age_picked(id, Duration::from_secs(120));

        let without_timer = queries.dequeue(10, &names(&["a"]), None).await.unwrap();
        assert!(without_timer.is_empty());

        let with_timer = queries
            .dequeue(10, &names(&["a"]), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(with_timer.len(), 1);
        assert_eq!(with_timer[0].id, id);
    }

    #[tokio::test]
    async fn log_job_keeps_the_first_terminal_status() {
        let queries = InMemoryQueries::new();
        queries.enqueue("a", None);
        let job = queries.dequeue(1, &names(&["a"]), None).await.unwrap().remove(0);

        queries.log_job(&job, JobStatus::Successful).await.unwrap();
        queries.log_job(&job, JobStatus::Successful).await.unwrap();
        queries.log_job(&job, JobStatus::Exception).await.unwrap();

        assert_eq!(queries.logged(), vec![(job.id, JobStatus::Successful)]);
        assert!(queries.get(job.id).is_none());
        assert_eq!(
            queries.counts(),
            QueueCounts {
                successful: 1,
                ..QueueCounts::default()
            }
        );
    }

    #[tokio::test]
    async fn log_job_for_a_job_not_in_the_table_is_dropped() {
        let queries = InMemoryQueries::new();
        let stranger = Job::queued(JobId::new(42), "a", None);

        queries.log_job(&stranger, JobStatus::Exception).await.unwrap();

        assert!(queries.logged().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let queries = InMemoryQueries::new();
        queries.enqueue("a", None);

        queries.fail_next_dequeue();
        assert!(queries.dequeue(1, &names(&["a"]), None).await.is_err());
        let job = queries.dequeue(1, &names(&["a"]), None).await.unwrap().remove(0);

        queries.fail_next_log();
        assert!(queries.log_job(&job, JobStatus::Exception).await.is_err());
        assert!(queries.log_job(&job, JobStatus::Exception).await.is_ok());
    }

    #[tokio::test]
    async fn schema_check_is_configurable() {
        let queries = InMemoryQueries::new();
        assert!(queries.has_updated_column().await.unwrap());
        queries.set_updated_column(false);
        assert!(!queries.has_updated_column().await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_notifies_attached_channel() {
        use crate::impls::InMemoryConnector;
        use crate::ports::Connector;

        let notifier = InMemoryNotifier::new();
        let connector = InMemoryConnector::new(notifier.clone());
        let queries = InMemoryQueries::new().with_notifier(notifier, "jobs");
        let mut conn = connector.connect().await.unwrap();
        let mut rx = conn.listen("jobs", 4).await.unwrap();

        queries.enqueue("email", None);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload, "email");
    }
}
