//! `bobbin` -- runs one queue manager until Ctrl-C.
//!
//! With `DATABASE_URL` set, jobs come from PostgreSQL. Without it an
//! in-memory queue is used and a handful of sample jobs is enqueued, which is
//! handy for trying the dispatcher locally.
//!
//! # Environment variables
//!
//! | Variable                      | Default          | Description                                  |
//! |-------------------------------|------------------|----------------------------------------------|
//! | `DATABASE_URL`                | --               | PostgreSQL URL; in-memory queue when unset   |
//! | `BOBBIN_CHANNEL`              | `bobbin_channel` | LISTEN/NOTIFY channel                        |
//! | `BOBBIN_BATCH_SIZE`           | `10`             | Jobs claimed per dequeue                     |
//! | `BOBBIN_DEQUEUE_TIMEOUT_SECS` | `30`             | Safety-net poll interval                     |
//! | `BOBBIN_RETRY_TIMER_SECS`     | --               | Reclaim jobs stuck in `picked` this long     |
//! | `BOBBIN_BLOCKING_LIMIT`       | --               | Max blocking handlers running at once        |
//! | `BOBBIN_POOL_SIZE`            | `10`             | Connections in the shared pool               |

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bobbin_core::app::DEFAULT_CHANNEL;
use bobbin_core::impls::{InMemoryConnector, InMemoryNotifier, InMemoryQueries};
use bobbin_core::typed::{Handler, TypedJob};
use bobbin_core::{
    CancellationToken, Entrypoint, HandlerResult, Job, QueueManager, QueueManagerConfig,
    RetryPolicy,
};
use bobbin_pg::{PgConnector, PgQueries};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl TypedJob for Hello {
    const ENTRYPOINT: &'static str = "hello";
}

struct HelloHandler;

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, task: Hello) -> HandlerResult {
        if task.name.is_empty() {
            return Err("name must not be empty".into());
        }
        tracing::info!(name = %task.name, "Hello, {}!", task.name);
        Ok(())
    }
}

/// FNV-1a over the payload; stands in for CPU-bound work.
fn checksum(job: &Job) -> HandlerResult {
    let payload = job.payload.as_deref().ok_or("checksum job without payload")?;
    let digest = payload.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    tracing::info!(job_id = %job.id, bytes = payload.len(), digest = %format!("{digest:016x}"), "checksum computed");
    Ok(())
}

/// Read `name` from the environment, falling back to `default` when unset.
/// A value that does not parse is reported and ignored.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_opt(name).unwrap_or(default)
}

fn env_opt<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

fn config_from_env() -> QueueManagerConfig {
    let mut config = QueueManagerConfig::default()
        .with_batch_size(env_or("BOBBIN_BATCH_SIZE", 10))
        .with_dequeue_timeout(Duration::from_secs(env_or("BOBBIN_DEQUEUE_TIMEOUT_SECS", 30)));
    if let Some(secs) = env_opt::<u64>("BOBBIN_RETRY_TIMER_SECS") {
        config = config.with_retry(RetryPolicy::reclaim_after(Duration::from_secs(secs)));
    }
    if let Some(limit) = env_opt::<usize>("BOBBIN_BLOCKING_LIMIT") {
        config = config.with_blocking_concurrency(limit);
    }
    config
}

fn enqueue_samples(queries: &InMemoryQueries) {
    for name in ["world", "bobbin", ""] {
        let payload = serde_json::to_vec(&Hello { name: name.to_string() }).ok();
        queries.enqueue(Hello::ENTRYPOINT, payload);
    }
    queries.enqueue_with_priority("checksum", Some(b"the quick brown fox".to_vec()), 5);
    queries.enqueue("checksum", None);
    queries.enqueue("unregistered", None);
}

/// Cancel once `signal` fires. A signal that could not be installed leaves
/// the token alone; the manager keeps running.
async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Ctrl-C received, shutting down");
            cancel.cancel();
        }
        Err(e) => tracing::error!(error = %e, "failed to install Ctrl-C handler"),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bobbin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let channel = std::env::var("BOBBIN_CHANNEL").unwrap_or_else(|_| DEFAULT_CHANNEL.to_string());
    let config = config_from_env();

    let mut manager = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool_size = env_or("BOBBIN_POOL_SIZE", DEFAULT_POOL_SIZE);
            let queries = PgQueries::connect(&url, pool_size)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "failed to connect to PostgreSQL");
                    std::process::exit(1);
                })
                .with_channel(channel.clone());
            tracing::info!(pool_size, "using PostgreSQL queue");
            QueueManager::new(Arc::new(queries), Arc::new(PgConnector::new(url)))
        }
        Err(_) => {
            let notifier = InMemoryNotifier::new();
            let queries = InMemoryQueries::new().with_notifier(notifier.clone(), channel.clone());
            enqueue_samples(&queries);
            tracing::info!("DATABASE_URL not set, using in-memory queue with sample jobs");
            QueueManager::new(Arc::new(queries), Arc::new(InMemoryConnector::new(notifier)))
        }
    }
    .with_channel(channel);

    let registered = manager
        .entrypoint_typed::<Hello, _>(HelloHandler)
        .and_then(|()| manager.register_entrypoint("checksum", Entrypoint::from_blocking_fn(checksum)));
    if let Err(e) = registered {
        tracing::error!(error = %e, "failed to register entrypoints");
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), cancel.clone()));

    if let Err(e) = manager.run(config, cancel).await {
        tracing::error!(error = %e, "queue manager failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_cancels_the_manager() {
        let cancel = CancellationToken::new();
        cancel_on_signal(async { Ok(()) }, cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn failed_signal_install_keeps_running() {
        let cancel = CancellationToken::new();
        let failed = async { Err(std::io::Error::other("no signal driver")) };
        cancel_on_signal(failed, cancel.clone()).await;
        assert!(!cancel.is_cancelled());
    }
}
