//! Connection port - a dedicated connection carrying the LISTEN subscription
//!
//! The dispatch loop never takes its wake-up connection from the shared pool:
//! pool contention must not starve the subscription, and LISTEN is session
//! state bound to one connection.
//!
//! Notifications are only a wake signal. Their payload is not interpreted, and
//! a full wake queue drops further events (they would trigger the same poll).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::StorageError;

/// One NOTIFY received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeEvent {
    pub channel: String,
    pub payload: String,
}

impl WakeEvent {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Bounded queue of wake events fed by a subscription.
pub type WakeReceiver = mpsc::Receiver<WakeEvent>;

/// Acquires connections that live outside the shared pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DedicatedConnection>, StorageError>;
}

/// A connection exclusively owned by one dispatch loop.
#[async_trait]
pub trait DedicatedConnection: Send {
    /// Subscribe to `channel`. NOTIFY traffic is forwarded into a bounded
    /// queue of `capacity` events.
    async fn listen(&mut self, channel: &str, capacity: usize) -> Result<WakeReceiver, StorageError>;

    async fn unlisten(&mut self, channel: &str) -> Result<(), StorageError>;

    /// Reset session state and give the connection back.
    async fn release(self: Box<Self>) -> Result<(), StorageError>;
}
