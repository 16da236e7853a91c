//! Error types for the service binary.
//!
//! [`ServiceError`] is the top-level error type that wraps all possible
//! failure modes during startup and shutdown.

/// Top-level error for the service binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: territory_core::config::ConfigError,
    },

    /// Connecting to or migrating the database failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying data layer error.
        #[from]
        source: territory_db::DbError,
    },

    /// The notification channel could not be set up.
    #[error("notifier error: {source}")]
    Notifier {
        /// The underlying notifier error.
        #[from]
        source: territory_core::notify::NotifyError,
    },

    /// The HTTP server failed to start or stopped abnormally.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: territory_api::ServerError,
    },
}
