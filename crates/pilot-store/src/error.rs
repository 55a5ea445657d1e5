//! Error taxonomy for the execution store.

/// Errors returned by the store contract operations in [`crate::queries`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No execution exists with the given id.
    #[error("execution {0} not found")]
    NotFound(String),

    /// A queued or running execution already exists for this task id.
    #[error("task {0} already has a queued or running execution")]
    Duplicate(String),

    /// The database reported contention (`SQLITE_BUSY`/`SQLITE_LOCKED`) that
    /// persisted past the retry budget.
    #[error("write contention on execution store, exhausted retries")]
    WriteContention,

    /// Migrations failed to apply.
    #[error("failed to run migrations")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Any other database error.
    #[error("database error")]
    Db(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
