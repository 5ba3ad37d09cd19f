//! Errors - エラー型と分類
//!
//! - `QueueError`: what `QueueManager::run` / `register_entrypoint` return.
//!   Only configuration and connection-acquisition failures end up here.
//! - `StorageError`: what the storage ports return. A failing `dequeue` or
//!   `log_job` is transient and is logged by the manager, not returned.
//! - Handler failures are plain boxed errors; the dispatcher contains them.

use thiserror::Error;

/// Boxed error returned by job handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type of a job handler.
pub type HandlerResult = Result<(), BoxError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("failed to decode job row: {0}")]
    Decode(String),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("entrypoint '{0}' is already registered")]
    DuplicateEntrypoint(String),

    #[error("entrypoints cannot be registered while the manager is running")]
    RegistryFrozen,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to acquire dedicated connection: {0}")]
    Connection(#[source] StorageError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueueError {
    /// Errors that abort before the loop starts because of how the manager
    /// or the database was set up.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QueueError::DuplicateEntrypoint(_)
                | QueueError::RegistryFrozen
                | QueueError::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_grouped() {
        assert!(QueueError::DuplicateEntrypoint("a".into()).is_configuration());
        assert!(QueueError::RegistryFrozen.is_configuration());
        assert!(QueueError::Configuration("x".into()).is_configuration());
        assert!(!QueueError::Connection(StorageError::Closed).is_configuration());
        assert!(!QueueError::Storage(StorageError::Closed).is_configuration());
    }

    #[test]
    fn messages_name_the_problem() {
        let msg = QueueError::DuplicateEntrypoint("email".into()).to_string();
        assert!(msg.contains("email"));

        let msg = QueueError::Connection(StorageError::Backend("refused".into())).to_string();
        assert!(msg.contains("dedicated connection"));
    }

    #[test]
    fn handler_errors_convert_with_question_mark() {
        fn parse(input: &str) -> HandlerResult {
            let _n: i32 = input.parse()?;
            Ok(())
        }
        assert!(parse("12").is_ok());
        assert!(parse("twelve").is_err());
    }
}
