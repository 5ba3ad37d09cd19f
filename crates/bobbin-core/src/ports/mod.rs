//! Ports - 抽象化レイヤー
//!
//! Interfaces to the external systems the dispatcher depends on. The core
//! only ever talks to PostgreSQL (or a fake) through these traits.
//!
//! - `Queries`: claim jobs, record terminal status, check the schema
//!   (goes through the shared pool).
//! - `Connector` / `DedicatedConnection`: the LISTEN side, one connection
//!   per dispatch loop.

pub mod connection;
pub mod queries;

pub use self::connection::{Connector, DedicatedConnection, WakeEvent, WakeReceiver};
pub use self::queries::Queries;
