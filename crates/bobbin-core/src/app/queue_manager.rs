//! QueueManager - dequeue / dispatch / wait loop
//!
//! # フロー
//! 1. Probe the schema (`has_updated_column`), fail fast if it is missing
//! 2. Acquire a dedicated connection and LISTEN on the channel
//! 3. While alive: drain wake events, dequeue a batch, spawn one dispatch task
//!    per job; a full batch polls again right away, a short one waits for a
//!    wake event (or `dequeue_timeout`, whichever comes first)
//! 4. On exit: UNLISTEN, release the connection, wait for every in-flight
//!    dispatch
//!
//! # Shutdown
//! `stop()` only flips a flag: in-flight handlers finish normally, and a wait
//! already in progress is not interrupted, so a stop takes effect within
//! `dequeue_timeout`. Cancel the token passed to `run` to interrupt the wait.
//! Either way `run` returns only after all dispatched jobs are done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use super::config::{DEFAULT_CHANNEL, QueueManagerConfig};
use super::dispatch::Dispatcher;
use super::task_manager::TaskManager;
use crate::domain::QueueError;
use crate::ports::{Connector, DedicatedConnection, Queries, WakeReceiver};
use crate::typed::{Entrypoint, EntrypointRegistry};

/// Cloneable handle that stops a running manager from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    alive: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

pub struct QueueManager {
    alive: Arc<AtomicBool>,
    registry: Arc<EntrypointRegistry>,
    channel: String,
    queries: Arc<dyn Queries>,
    connector: Arc<dyn Connector>,
}

/// Why the wait between polls ended.
enum Wake {
    Event,
    Timeout,
    Closed,
    Cancelled,
}

impl QueueManager {
    pub fn new(queries: Arc<dyn Queries>, connector: Arc<dyn Connector>) -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            registry: Arc::new(EntrypointRegistry::new()),
            channel: DEFAULT_CHANNEL.to_string(),
            queries,
            connector,
        }
    }

    /// Use a different LISTEN channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn registry(&self) -> &EntrypointRegistry {
        &self.registry
    }

    /// Register a handler under `name`. Must happen before `run`.
    ///
    /// Fails with `RegistryFrozen` while dispatch tasks of a previous run
    /// (for example one whose future was dropped) still hold the registry.
    pub fn register_entrypoint(
        &mut self,
        name: impl Into<String>,
        entrypoint: Entrypoint,
    ) -> Result<(), QueueError> {
        // run が registry を共有している間は get_mut が失敗する
        let registry = Arc::get_mut(&mut self.registry).ok_or(QueueError::RegistryFrozen)?;
        registry.register(name, entrypoint)
    }

    pub fn entrypoint_async<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), QueueError>
    where
        H: crate::typed::AsyncHandler + 'static,
    {
        self.register_entrypoint(name, Entrypoint::asynchronous(handler))
    }

    pub fn entrypoint_blocking<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), QueueError>
    where
        H: crate::typed::BlockingHandler + 'static,
    {
        self.register_entrypoint(name, Entrypoint::blocking(handler))
    }

    /// Register a typed handler under `T::ENTRYPOINT`.
    pub fn entrypoint_typed<T, H>(&mut self, handler: H) -> Result<(), QueueError>
    where
        T: crate::typed::TypedJob,
        H: crate::typed::Handler<T> + 'static,
    {
        self.register_entrypoint(T::ENTRYPOINT, Entrypoint::typed::<T, H>(handler))
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            alive: Arc::clone(&self.alive),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Run the loop until `stop()` or `cancel` fires.
    ///
    /// Only setup failures are returned: invalid config, missing schema
    /// capability, or a dedicated connection that cannot be acquired. Per-job
    /// and per-poll failures are logged and the loop keeps going.
    pub async fn run(
        &self,
        config: QueueManagerConfig,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        config.validate()?;

        if !self.queries.has_updated_column().await? {
            return Err(QueueError::Configuration(
                "the queue table has no 'updated' column; run the schema upgrade before starting the manager"
                    .to_string(),
            ));
        }

        let mut connection = self
            .connector
            .connect()
            .await
            .map_err(QueueError::Connection)?;

        let wake_rx = match connection.listen(&self.channel, config.wake_capacity).await {
            Ok(rx) => rx,
            Err(e) => {
                if let Err(release_err) = connection.release().await {
                    tracing::warn!(error = %release_err, "failed to release dedicated connection");
                }
                return Err(QueueError::Connection(e));
            }
        };

        tracing::info!(
            channel = %self.channel,
            entrypoints = self.registry.len(),
            batch_size = config.batch_size,
            dequeue_timeout_ms = config.dequeue_timeout.as_millis() as u64,
            "queue manager started",
        );

        let tasks = TaskManager::new();
        let dispatcher = Dispatcher {
            registry: Arc::clone(&self.registry),
            queries: Arc::clone(&self.queries),
            blocking_permits: config
                .blocking_concurrency
                .map(|n| Arc::new(Semaphore::new(n))),
        };

        self.event_loop(&config, &cancel, wake_rx, &tasks, &dispatcher)
            .await;

        drop(dispatcher);
        self.shutdown(connection, &tasks).await;
        Ok(())
    }

    async fn event_loop(
        &self,
        config: &QueueManagerConfig,
        cancel: &CancellationToken,
        mut wake_rx: WakeReceiver,
        tasks: &TaskManager,
        dispatcher: &Dispatcher,
    ) {
        let entrypoints = self.registry.names();
        let retry_timer = config.retry.retry_timer();
        let mut wake_closed = false;

        while self.is_alive() && !cancel.is_cancelled() {
            // ここまでに届いた通知は次の dequeue でまとめて拾える
            if !wake_closed && drain(&mut wake_rx) {
                tracing::warn!(channel = %self.channel, "wake queue closed, falling back to polling");
                wake_closed = true;
            }

            let batch_len = match self
                .queries
                .dequeue(config.batch_size, &entrypoints, retry_timer)
                .await
            {
                Ok(batch) => {
                    let len = batch.len();
                    if len > 0 {
                        tracing::debug!(batch = len, "dequeued jobs");
                    }
                    for job in batch {
                        tasks.add(dispatcher.clone().dispatch(job));
                    }
                    len
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dequeue failed, retrying after wait");
                    0
                }
            };

            // full batch: まだ残っている可能性があるので即 poll
            if batch_len == config.batch_size {
                continue;
            }

            if !self.is_alive() {
                break;
            }

            match wait_for_wake(&mut wake_rx, wake_closed, config.dequeue_timeout, cancel).await {
                Wake::Event => tracing::debug!("woken by notification"),
                Wake::Timeout => tracing::debug!("no notification within dequeue_timeout, polling"),
                Wake::Closed => {
                    tracing::warn!(channel = %self.channel, "wake queue closed, falling back to polling");
                    wake_closed = true;
                }
                Wake::Cancelled => break,
            }
        }
    }

    async fn shutdown(&self, mut connection: Box<dyn DedicatedConnection>, tasks: &TaskManager) {
        tracing::info!(in_flight = tasks.len(), "queue manager stopping");

        if let Err(e) = connection.unlisten(&self.channel).await {
            tracing::warn!(error = %e, channel = %self.channel, "failed to unlisten");
        }
        if let Err(e) = connection.release().await {
            tracing::warn!(error = %e, "failed to release dedicated connection");
        }

        tasks.wait().await;
        tracing::info!("queue manager stopped");
    }
}

/// Consume every queued wake event without blocking.
/// Returns true when the subscription has gone away.
fn drain(wake_rx: &mut WakeReceiver) -> bool {
    loop {
        match wake_rx.try_recv() {
            Ok(_) => continue,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}

async fn wait_for_wake(
    wake_rx: &mut WakeReceiver,
    wake_closed: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Wake {
    if wake_closed {
        return tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = tokio::time::sleep(timeout) => Wake::Timeout,
        };
    }

    tokio::select! {
        _ = cancel.cancelled() => Wake::Cancelled,
        received = tokio::time::timeout(timeout, wake_rx.recv()) => match received {
            Ok(Some(_)) => Wake::Event,
            Ok(None) => Wake::Closed,
            Err(_) => Wake::Timeout,
        },
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("alive", &self.is_alive())
            .field("channel", &self.channel)
            .field("entrypoints", &self.registry.names())
            .finish()
    }
}
