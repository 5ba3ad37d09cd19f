//! PgConnector - dedicated LISTEN connection
//!
//! `PgListener` opens its own connection, outside any pool. While a channel
//! is subscribed, the listener is owned by a forwarding task that copies
//! notifications into the bounded wake queue; `unlisten` and `release` stop
//! that task and take the listener back.

use async_trait::async_trait;
use bobbin_core::domain::StorageError;
use bobbin_core::ports::{Connector, DedicatedConnection, WakeEvent, WakeReceiver};
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{PgError, storage};

/// Opens one `PgListener` per `connect`.
#[derive(Debug, Clone)]
pub struct PgConnector {
    target: Target,
}

#[derive(Debug, Clone)]
enum Target {
    Url(String),
    Options(PgConnectOptions),
}

impl PgConnector {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            target: Target::Url(database_url.into()),
        }
    }

    /// Connect with already-parsed options, e.g. `pool.connect_options()`.
    pub fn with_options(options: PgConnectOptions) -> Self {
        Self {
            target: Target::Options(options),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn DedicatedConnection>, StorageError> {
        let listener = match &self.target {
            Target::Url(url) => PgListener::connect(url).await,
            Target::Options(options) => {
                // 単独接続のプール。共有プールからは借りない
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .max_lifetime(None)
                    .idle_timeout(None)
                    .connect_with(options.clone())
                    .await
                    .map_err(storage)?;
                PgListener::connect_with(&pool).await
            }
        }
        .map_err(storage)?;
        Ok(Box::new(PgConnection {
            listener: Some(listener),
            forwarder: None,
            channel: None,
        }))
    }
}

struct Forwarder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<PgListener>,
}

pub struct PgConnection {
    /// `None` while a forwarder owns the listener.
    listener: Option<PgListener>,
    forwarder: Option<Forwarder>,
    /// Subscribed channel. One listener feeds one wake queue.
    channel: Option<String>,
}

impl PgConnection {
    /// Stop the forwarder (if any) and get the listener back.
    async fn take_listener(&mut self) -> Result<PgListener, PgError> {
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.stop.send(());
            return Ok(forwarder.task.await?);
        }
        self.listener.take().ok_or(PgError::ListenerGone)
    }
}

fn spawn_forwarder(mut listener: PgListener, tx: mpsc::Sender<WakeEvent>) -> Forwarder {
    let (stop, mut stopped) = oneshot::channel();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                received = listener.try_recv() => match received {
                    Ok(Some(notification)) => {
                        let event = WakeEvent::new(notification.channel(), notification.payload());
                        // 満杯なら捨てる
                        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(event) {
                            break;
                        }
                    }
                    // 接続が切れた: 次の try_recv で再接続し LISTEN し直す
                    Ok(None) => tracing::warn!("listen connection lost, reconnecting"),
                    Err(e) => {
                        tracing::warn!(error = %e, "listen connection failed, wake queue closed");
                        break;
                    }
                },
            }
        }
        listener
    });
    Forwarder { stop, task }
}

#[async_trait]
impl DedicatedConnection for PgConnection {
    async fn listen(&mut self, channel: &str, capacity: usize) -> Result<WakeReceiver, StorageError> {
        if let Some(current) = &self.channel {
            return Err(storage(PgError::AlreadyListening(current.clone())));
        }

        let mut listener = self.take_listener().await.map_err(storage)?;
        if let Err(e) = listener.listen(channel).await {
            self.listener = Some(listener);
            return Err(storage(e));
        }

        let (tx, rx) = mpsc::channel(capacity);
        self.forwarder = Some(spawn_forwarder(listener, tx));
        self.channel = Some(channel.to_string());
        tracing::debug!(channel, "listening");
        Ok(rx)
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), StorageError> {
        if self.channel.as_deref() != Some(channel) {
            return Ok(());
        }
        self.channel = None;
        let mut listener = self.take_listener().await.map_err(storage)?;
        let result = listener.unlisten(channel).await;
        self.listener = Some(listener);
        result.map_err(storage)
    }

    async fn release(mut self: Box<Self>) -> Result<(), StorageError> {
        self.channel = None;
        let mut listener = self.take_listener().await.map_err(storage)?;
        // セッション状態を戻してから閉じる
        let result = listener.unlisten_all().await;
        drop(listener);
        result.map_err(storage)
    }
}
