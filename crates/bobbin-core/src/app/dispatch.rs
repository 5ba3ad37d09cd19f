//! Dispatch - run one claimed job and record its terminal status
//!
//! # フロー
//! 1. Look up the handler by `job.entrypoint`
//! 2. Async handlers are awaited on the dispatch task; blocking handlers go to
//!    the blocking pool
//! 3. `log_job(successful)` on return, `log_job(exception)` on error, panic or
//!    unknown entrypoint
//!
//! Nothing escapes: a handler failure is logged and recorded, never returned.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::domain::{Job, JobStatus};
use crate::ports::Queries;
use crate::typed::{Entrypoint, EntrypointRegistry};

/// Everything a dispatch task needs, shared by all tasks of one run.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<EntrypointRegistry>,
    pub(crate) queries: Arc<dyn Queries>,
    pub(crate) blocking_permits: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub(crate) async fn dispatch(self, job: Job) {
        let span = tracing::info_span!("dispatch", job_id = %job.id, entrypoint = %job.entrypoint);
        async move {
            let status = self.execute(&job).await;
            if let Err(e) = self.queries.log_job(&job, status).await {
                tracing::error!(error = %e, status = %status, "failed to log job status");
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &Job) -> JobStatus {
        let Some(entrypoint) = self.registry.get(&job.entrypoint).cloned() else {
            tracing::error!("no handler registered for entrypoint");
            return JobStatus::Exception;
        };

        let outcome = match entrypoint {
            Entrypoint::Async(handler) => {
                match AssertUnwindSafe(handler.handle(job)).catch_unwind().await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(panic) => Err(panic_message(panic.as_ref())),
                }
            }
            Entrypoint::Blocking(handler) => {
                // permit は handler 実行中ずっと保持する
                let _permit = match &self.blocking_permits {
                    Some(permits) => match permits.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            tracing::error!("blocking pool is closed");
                            return JobStatus::Exception;
                        }
                    },
                    None => None,
                };
                let owned = job.clone();
                match tokio::task::spawn_blocking(move || handler.handle(&owned)).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(join_err) if join_err.is_panic() => {
                        Err(panic_message(join_err.into_panic().as_ref()))
                    }
                    Err(join_err) => Err(join_err.to_string()),
                }
            }
        };

        match outcome {
            Ok(()) => {
                tracing::debug!("job completed");
                JobStatus::Successful
            }
            Err(error) => {
                tracing::error!(%error, "job handler failed");
                JobStatus::Exception
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}
