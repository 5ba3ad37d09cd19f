//! bobbin-core
//!
//! Core of the bobbin job queue: a dispatcher that claims jobs from a shared
//! PostgreSQL table, fans them out to registered entrypoints and shuts down
//! cleanly.
//!
//! # モジュール構成
//! - **domain**: jobs, statuses, ids, errors, retry policy
//! - **ports**: what the dispatcher needs from storage (`Queries`) and from
//!   LISTEN/NOTIFY (`Connector`, `DedicatedConnection`)
//! - **typed**: entrypoints, handler traits, typed payloads, registry
//! - **app**: `QueueManager`, `TaskManager`, configuration
//! - **impls**: in-memory ports for development and tests
//!
//! # 使用例
//! ```ignore
//! let mut manager = QueueManager::new(queries, connector);
//! manager.register_entrypoint("email", Entrypoint::from_async_fn(send_email))?;
//! manager.register_entrypoint("thumbnail", Entrypoint::from_blocking_fn(render))?;
//!
//! let cancel = CancellationToken::new();
//! manager.run(QueueManagerConfig::default(), cancel.clone()).await?;
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{QueueManager, QueueManagerConfig, ShutdownHandle};
pub use domain::{BoxError, HandlerResult, Job, JobId, JobStatus, QueueError, RetryPolicy, StorageError};
pub use typed::{Capability, Entrypoint};

/// Re-exported so callers can build the token `QueueManager::run` takes.
pub use tokio_util::sync::CancellationToken;
