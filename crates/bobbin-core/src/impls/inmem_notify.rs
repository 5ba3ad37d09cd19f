//! InMemoryNotifier - 開発用の NOTIFY バス
//!
//! Stands in for PostgreSQL LISTEN/NOTIFY: `notify(channel, payload)` reaches
//! every connection currently listening on that channel.
//!
//! - `InMemoryConnector::connect` hands out `InMemoryConnection`s
//! - `listen` spawns a forwarder from the bus into a bounded wake queue;
//!   events that do not fit are dropped, like coalesced NOTIFYs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::domain::StorageError;
use crate::ports::{Connector, DedicatedConnection, WakeEvent, WakeReceiver};

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct InMemoryNotifier {
    bus: broadcast::Sender<WakeEvent>,
    listeners: Arc<Mutex<HashMap<String, usize>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            bus,
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish a notification. Returns false when nobody is listening.
    pub fn notify(&self, channel: &str, payload: &str) -> bool {
        self.bus.send(WakeEvent::new(channel, payload)).is_ok()
    }

    /// Number of connections listening on `channel`.
    pub fn listeners(&self, channel: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.get(channel).copied().unwrap_or(0)
    }

    fn add_listener(&self, channel: &str) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        *listeners.entry(channel.to_string()).or_default() += 1;
    }

    fn remove_listener(&self, channel: &str) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = listeners.get_mut(channel) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                listeners.remove(channel);
            }
        }
    }
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out connections attached to an `InMemoryNotifier`.
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    notifier: InMemoryNotifier,
    fail_connect: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    pub fn new(notifier: InMemoryNotifier) -> Self {
        Self {
            notifier,
            fail_connect: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn notifier(&self) -> &InMemoryNotifier {
        &self.notifier
    }

    /// Make every following `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Connections handed out so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connections given back through `release`.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> Result<Box<dyn DedicatedConnection>, StorageError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection refused".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConnection {
            notifier: self.notifier.clone(),
            releases: Arc::clone(&self.releases),
            subscriptions: HashMap::new(),
        }))
    }
}

pub struct InMemoryConnection {
    notifier: InMemoryNotifier,
    releases: Arc<AtomicUsize>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

#[async_trait]
impl DedicatedConnection for InMemoryConnection {
    async fn listen(&mut self, channel: &str, capacity: usize) -> Result<WakeReceiver, StorageError> {
        if self.subscriptions.contains_key(channel) {
            return Err(StorageError::Backend(format!(
                "already listening on {channel}"
            )));
        }

        let (tx, rx) = mpsc::channel(capacity);
        let mut bus = self.notifier.bus.subscribe();
        let wanted = channel.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(event) if event.channel == wanted => {
                        // 満杯なら捨てる: どうせ同じ poll が走る
                        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(event) {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.notifier.add_listener(channel);
        self.subscriptions.insert(channel.to_string(), forwarder);
        Ok(rx)
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), StorageError> {
        if let Some(forwarder) = self.subscriptions.remove(channel) {
            forwarder.abort();
            self.notifier.remove_listener(channel);
        }
        Ok(())
    }

    async fn release(mut self: Box<Self>) -> Result<(), StorageError> {
        for (channel, forwarder) in self.subscriptions.drain() {
            forwarder.abort();
            self.notifier.remove_listener(&channel);
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn notify_reaches_listener_on_same_channel() {
        let notifier = InMemoryNotifier::new();
        let connector = InMemoryConnector::new(notifier.clone());
        let mut conn = connector.connect().await.unwrap();
        let mut rx = conn.listen("jobs", 4).await.unwrap();

        assert!(notifier.notify("other", "x"));
        assert!(notifier.notify("jobs", "email"));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, WakeEvent::new("jobs", "email"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_wake_queue_drops_events() {
        let notifier = InMemoryNotifier::new();
        let connector = InMemoryConnector::new(notifier.clone());
        let mut conn = connector.connect().await.unwrap();
        let mut rx = conn.listen("jobs", 2).await.unwrap();

        for i in 0..10 {
            notifier.notify("jobs", &i.to_string());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn unlisten_and_release_are_tracked() {
        let notifier = InMemoryNotifier::new();
        let connector = InMemoryConnector::new(notifier.clone());
        let mut conn = connector.connect().await.unwrap();
        let _rx = conn.listen("jobs", 4).await.unwrap();
        assert_eq!(notifier.listeners("jobs"), 1);

        conn.unlisten("jobs").await.unwrap();
        assert_eq!(notifier.listeners("jobs"), 0);

        conn.release().await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.releases(), 1);
    }

    #[tokio::test]
    async fn connect_can_be_made_to_fail() {
        let connector = InMemoryConnector::new(InMemoryNotifier::new());
        connector.fail_connect(true);
        assert!(connector.connect().await.is_err());
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn listening_twice_on_one_connection_fails() {
        let connector = InMemoryConnector::new(InMemoryNotifier::new());
        let mut conn = connector.connect().await.unwrap();
        let _rx = conn.listen("jobs", 4).await.unwrap();
        assert!(conn.listen("jobs", 4).await.is_err());
    }
}
