//! TaskManager - in-flight dispatch tasks and the shutdown barrier

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Tracks every dispatch task spawned by one run of the loop.
///
/// - `add` spawns and tracks; it can be called any number of times before
///   `wait`.
/// - `wait` returns once every added task has finished. Tasks keep running
///   to completion; nothing is cancelled.
#[derive(Debug, Default)]
pub struct TaskManager {
    tracker: TaskTracker,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    pub fn add<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Block until all tracked tasks complete.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
