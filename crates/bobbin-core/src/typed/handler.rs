//! Handler traits - what an entrypoint runs for each job
//!
//! # 二層構造
//! - **Dyn**: `AsyncHandler` / `BlockingHandler` are object-safe and take the
//!   raw `Job`. The registry stores them as trait objects.
//! - **Typed**: `Handler<T>` receives an already decoded payload `T`;
//!   `TypedHandler<T, H>` erases it into an `AsyncHandler`.
//!
//! Whether a handler may block is not guessed at runtime: the caller picks
//! the trait, and the dispatcher runs `BlockingHandler`s on the blocking pool.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::TypedJob;
use crate::domain::{HandlerResult, Job};

/// A handler that cooperates with the runtime: it only suspends on `.await`
/// and never blocks the thread.
#[async_trait]
pub trait AsyncHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> HandlerResult;
}

/// A handler that may block (CPU-bound work, synchronous I/O, FFI).
pub trait BlockingHandler: Send + Sync {
    fn handle(&self, job: &Job) -> HandlerResult;
}

/// Adapter for async closures: `|job| async move { ... }`.
pub struct AsyncFn<F>(pub F);

#[async_trait]
impl<F, Fut> AsyncHandler for AsyncFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, job: &Job) -> HandlerResult {
        (self.0)(job.clone()).await
    }
}

/// Adapter for blocking closures: `|job| { ... }`.
pub struct BlockingFn<F>(pub F);

impl<F> BlockingHandler for BlockingFn<F>
where
    F: Fn(&Job) -> HandlerResult + Send + Sync,
{
    fn handle(&self, job: &Job) -> HandlerResult {
        (self.0)(job)
    }
}

/// Handler for a typed payload.
///
/// ```ignore
/// struct SendEmailHandler;
///
/// #[async_trait]
/// impl Handler<SendEmail> for SendEmailHandler {
///     async fn handle(&self, task: SendEmail) -> HandlerResult {
///         mailer::send(&task.to).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: TypedJob>: Send + Sync {
    async fn handle(&self, task: T) -> HandlerResult;
}

/// Decodes the JSON payload into `T` and forwards to `H`.
///
/// A missing or malformed payload fails the job.
pub struct TypedHandler<T: TypedJob, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedJob, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedJob, H: Handler<T>> AsyncHandler for TypedHandler<T, H> {
    async fn handle(&self, job: &Job) -> HandlerResult {
        let bytes = job
            .payload
            .as_deref()
            .ok_or_else(|| format!("{}: job {} has no payload", T::ENTRYPOINT, job.id))?;
        let task: T = serde_json::from_slice(bytes)
            .map_err(|e| format!("{}: json decode: {e}", T::ENTRYPOINT))?;
        self.handler.handle(task).await
    }
}
