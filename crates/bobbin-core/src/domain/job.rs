//! Job record and status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Lifecycle status of a job.
///
/// State transitions:
/// - Queued -> Picked -> Successful
/// - Queued -> Picked -> Exception
/// - Picked -> Picked (a stale claim reclaimed by another dequeue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,

    /// Claimed by a manager and handed to a dispatch task.
    Picked,

    /// Handler returned normally.
    Successful,

    /// Handler failed, panicked, or no handler was registered.
    Exception,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Picked => "picked",
            JobStatus::Successful => "successful",
            JobStatus::Exception => "exception",
        }
    }

    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Successful | JobStatus::Exception)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Picked)
                | (JobStatus::Picked, JobStatus::Picked)
                | (JobStatus::Picked, JobStatus::Successful)
                | (JobStatus::Picked, JobStatus::Exception)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "picked" => Ok(JobStatus::Picked),
            "successful" => Ok(JobStatus::Successful),
            "exception" => Ok(JobStatus::Exception),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A unit of work as handed out by storage.
///
/// The manager never persists jobs itself: it only claims them through
/// `Queries::dequeue` and reports the terminal status through `Queries::log_job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Higher priority jobs are claimed first.
    pub priority: i32,
    pub entrypoint: String,
    /// Opaque to the manager; only handlers interpret it.
    pub payload: Option<Vec<u8>>,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub status_at: DateTime<Utc>,
}

impl Job {
    /// A freshly enqueued job.
    pub fn queued(id: JobId, entrypoint: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        let now = Utc::now();
        Self {
            id,
            priority: 0,
            entrypoint: entrypoint.into(),
            payload,
            status: JobStatus::Queued,
            enqueued_at: now,
            picked_at: None,
            status_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Move into `picked`. Returns false (and leaves the job untouched) when
    /// the transition is not allowed.
    pub fn mark_picked(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(JobStatus::Picked) {
            return false;
        }
        self.status = JobStatus::Picked;
        self.picked_at = Some(at);
        self.status_at = at;
        true
    }

    /// Payload as UTF-8, if it is present and valid.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}
