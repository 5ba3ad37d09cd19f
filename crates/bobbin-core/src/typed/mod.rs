//! Typed - entrypoints and their handlers
//!
//! An entrypoint is a name plus a handler tagged `Async` or `Blocking`.
//! Typed payloads (`TypedJob` + `Handler<T>`) sit on top and decode the job's
//! JSON payload before the handler sees it.

pub mod entrypoint;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::entrypoint::{Capability, Entrypoint};
pub use self::handler::{AsyncFn, AsyncHandler, BlockingFn, BlockingHandler, Handler, TypedHandler};
pub use self::registry::EntrypointRegistry;
pub use self::task::TypedJob;
