//! Errors raised inside the PostgreSQL adapters.
//!
//! Callers only ever see `StorageError`; `PgError` exists so that `?` works
//! on `sqlx::Error` inside this crate.

use bobbin_core::StorageError;
use bobbin_core::domain::UnknownStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Status(#[from] UnknownStatus),

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("already listening on '{0}'")]
    AlreadyListening(String),

    #[error("listener connection is gone")]
    ListenerGone,

    #[error("listener forwarder task failed: {0}")]
    Forwarder(#[from] tokio::task::JoinError),
}

impl From<PgError> for StorageError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Sqlx(sqlx::Error::PoolClosed) | PgError::ListenerGone => StorageError::Closed,
            PgError::Sqlx(
                e @ (sqlx::Error::ColumnDecode { .. }
                | sqlx::Error::ColumnNotFound(_)
                | sqlx::Error::Decode(_)),
            ) => StorageError::Decode(e.to_string()),
            PgError::Status(e) => StorageError::Decode(e.to_string()),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

pub(crate) fn storage(err: impl Into<PgError>) -> StorageError {
    StorageError::from(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_pool_maps_to_closed() {
        assert!(matches!(storage(sqlx::Error::PoolClosed), StorageError::Closed));
    }

    #[test]
    fn missing_listener_maps_to_closed() {
        assert!(matches!(storage(PgError::ListenerGone), StorageError::Closed));
    }

    #[test]
    fn bad_status_maps_to_decode() {
        let err = storage(UnknownStatus("done".into()));
        assert!(matches!(err, StorageError::Decode(ref msg) if msg.contains("done")));
    }

    #[test]
    fn everything_else_is_backend() {
        let err = storage(PgError::InvalidTableName("jobs;".into()));
        assert!(matches!(err, StorageError::Backend(ref msg) if msg.contains("jobs;")));

        let err = storage(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
