//! Domain model (ids, jobs, statuses, errors, retry policy).

pub mod errors;
pub mod ids;
pub mod job;
pub mod retry;

pub use self::errors::{BoxError, HandlerResult, QueueError, StorageError};
pub use self::ids::JobId;
pub use self::job::{Job, JobStatus, UnknownStatus};
pub use self::retry::RetryPolicy;
