//! Entrypoint - a handler tagged with how it must be run

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::handler::{AsyncFn, AsyncHandler, BlockingFn, BlockingHandler, Handler, TypedHandler};
use super::task::TypedJob;
use crate::domain::{HandlerResult, Job};

/// Execution capability declared at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Awaited directly on the dispatch task.
    Async,
    /// Offloaded to the blocking pool.
    Blocking,
}

/// A registered handler. Cloning is cheap (the handler is shared).
#[derive(Clone)]
pub enum Entrypoint {
    Async(Arc<dyn AsyncHandler>),
    Blocking(Arc<dyn BlockingHandler>),
}

impl Entrypoint {
    pub fn asynchronous<H: AsyncHandler + 'static>(handler: H) -> Self {
        Entrypoint::Async(Arc::new(handler))
    }

    pub fn blocking<H: BlockingHandler + 'static>(handler: H) -> Self {
        Entrypoint::Blocking(Arc::new(handler))
    }

    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::asynchronous(AsyncFn(f))
    }

    pub fn from_blocking_fn<F>(f: F) -> Self
    where
        F: Fn(&Job) -> HandlerResult + Send + Sync + 'static,
    {
        Self::blocking(BlockingFn(f))
    }

    /// Wrap a typed handler; the payload is decoded as JSON into `T`.
    pub fn typed<T: TypedJob, H: Handler<T> + 'static>(handler: H) -> Self {
        Self::asynchronous(TypedHandler::<T, H>::new(handler))
    }

    pub fn capability(&self) -> Capability {
        match self {
            Entrypoint::Async(_) => Capability::Async,
            Entrypoint::Blocking(_) => Capability::Blocking,
        }
    }
}

impl fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entrypoint").field(&self.capability()).finish()
    }
}
