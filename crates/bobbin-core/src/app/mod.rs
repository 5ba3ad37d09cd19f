//! App - アプリケーション層
//!
//! Wires the ports together into the dispatcher.
//!
//! # 主要コンポーネント
//! - **QueueManager**: dequeue / dispatch / wait loop, LISTEN subscription,
//!   shutdown barrier
//! - **TaskManager**: tracks in-flight dispatch tasks
//! - **Dispatcher**: runs one job and records its terminal status
//! - **QueueManagerConfig**: batch size, timeouts, retry policy

pub mod config;
mod dispatch;
pub mod queue_manager;
pub mod task_manager;

pub use self::config::{DEFAULT_CHANNEL, QueueManagerConfig};
pub use self::queue_manager::{QueueManager, ShutdownHandle};
pub use self::task_manager::TaskManager;
