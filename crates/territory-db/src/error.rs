//! Error types for the data layer.
//!
//! Pool setup and migrations fail with [`DbError`]. Queries issued through
//! the store ports fail with [`StoreError`], produced from the underlying
//! [`sqlx`] error by [`store_error`].

use territory_core::ports::StoreError;

/// Errors that can occur while setting up the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Classify a query failure for the lifecycle engine.
///
/// Unique and foreign-key violations are conflicts (duplicate number, second
/// open record, user still referenced). Connection-level failures mean the
/// backend is unavailable. Everything else is a backend error.
pub fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Conflict {
                message: db.message().to_owned(),
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable {
            message: err.to_string(),
        },
        _ => StoreError::Backend {
            message: err.to_string(),
        },
    }
}

/// A row that cannot be turned back into a domain value.
pub(crate) fn decode_error(entity: &str, detail: impl core::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("undecodable {entity} row: {detail}"),
    }
}
