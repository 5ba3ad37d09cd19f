//! Impls - 実装（開発用・テスト用）
//!
//! In-memory implementations of the ports:
//! - **InMemoryQueries**: the job table
//! - **InMemoryNotifier** / **InMemoryConnector**: LISTEN/NOTIFY
//!
//! The PostgreSQL implementations live in the `bobbin-pg` crate.

pub mod inmem_notify;
pub mod inmem_queries;

pub use self::inmem_notify::{InMemoryConnection, InMemoryConnector, InMemoryNotifier};
pub use self::inmem_queries::{InMemoryQueries, QueueCounts};
