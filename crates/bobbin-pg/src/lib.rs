//! bobbin-pg
//!
//! PostgreSQL adapters for the bobbin ports:
//! - **PgQueries**: `Queries` over a shared `PgPool`, plus an `enqueue`
//!   helper for producers
//! - **PgConnector**: a dedicated `PgListener` connection per dispatch loop
//!
//! # 前提とするスキーマ
//! The tables are created and upgraded out of band; nothing here runs DDL.
//! `QueueManager::run` refuses to start when the queue table has no `updated`
//! column.
//!
//! ```text
//! bobbin_jobs                          bobbin_log
//!   id          BIGSERIAL PRIMARY KEY    id          BIGINT
//!   priority    INTEGER                  priority    INTEGER
//!   entrypoint  TEXT                     entrypoint  TEXT
//!   payload     BYTEA NULL               payload     BYTEA NULL
//!   status      TEXT  -- queued|picked   status      TEXT  -- successful|exception
//!   enqueued    TIMESTAMPTZ              enqueued    TIMESTAMPTZ
//!   picked      TIMESTAMPTZ NULL         picked      TIMESTAMPTZ NULL
//!   updated     TIMESTAMPTZ              logged      TIMESTAMPTZ
//! ```
//!
//! # 使用例
//! ```ignore
//! let queries = Arc::new(PgQueries::connect(&url, 10).await?);
//! let connector = Arc::new(PgConnector::new(&url));
//! let manager = QueueManager::new(queries, connector);
//! ```

pub mod connection;
pub mod error;
pub mod queries;

pub use connection::{PgConnection, PgConnector};
pub use error::PgError;
pub use queries::{PgQueries, TableNames};
