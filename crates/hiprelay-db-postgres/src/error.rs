//! Error types for the PostgreSQL flow store.

use hiprelay_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

/// Errors specific to the PostgreSQL flow store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error raised by sqlx.
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Returns `true` if the sqlx error means no usable connection was obtained.
fn is_connection_failure(err: &SqlxError) -> bool {
    matches!(
        err,
        SqlxError::PoolTimedOut
            | SqlxError::PoolClosed
            | SqlxError::Io(_)
            | SqlxError::Tls(_)
            | SqlxError::WorkerCrashed
    )
}

/// Maps a sqlx error to a storage error, separating connection failures
/// from failures of the statement itself.
pub fn classify_sqlx_error(err: SqlxError, context: &str) -> StorageError {
    if is_connection_failure(&err) {
        StorageError::connection_error(format!("{context}: {err}"))
    } else {
        StorageError::operation_failed(format!("{context}: {err}"))
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Database(e) => classify_sqlx_error(e, "Database error"),
            PostgresError::Migration(e) => StorageError::internal(format!("Migration error: {e}")),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
