//! `PostgreSQL` pool for the territory tables.
//!
//! The pool is sized and bounded by the `store` section of the service
//! configuration: `max_connections` caps the pool and the per-call
//! operation timeout doubles as the acquire timeout, so a saturated pool
//! surfaces as a store timeout rather than a hang. Queries are built at
//! runtime, so builds never need a live database.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use territory_core::config::StoreConfig;
use tracing::info;

use crate::error::DbError;

/// Idle connections are recycled after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Shared pool handle.
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    fn options(store: &StoreConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(store.max_connections)
            .acquire_timeout(store.operation_timeout())
            .idle_timeout(IDLE_TIMEOUT)
    }

    /// Connect with the settings in `store`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed and
    /// [`DbError::Postgres`] if no connection can be made.
    pub async fn connect(store: &StoreConfig) -> Result<Self, DbError> {
        let target: PgConnectOptions = store
            .database_url
            .parse()
            .map_err(|e: sqlx::Error| DbError::Config(format!("invalid database url: {e}")))?;
        let pool = Self::options(store).connect_with(target).await?;
        info!(
            max_connections = store.max_connections,
            acquire_timeout_ms = store.operation_timeout_ms,
            "connected to postgres"
        );
        Ok(Self { pool })
    }

    /// Connect, then apply pending migrations when `store.run_migrations`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if connecting or migrating fails.
    pub async fn open(store: &StoreConfig) -> Result<Self, DbError> {
        let pool = Self::connect(store).await?;
        if store.run_migrations {
            pool.migrate().await?;
        }
        Ok(pool)
    }

    /// Apply pending migrations from `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("territory schema up to date");
        Ok(())
    }

    /// The underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wait for checked-out connections and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("postgres pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(url: &str) -> StoreConfig {
        StoreConfig {
            database_url: url.to_owned(),
            max_connections: 4,
            operation_timeout_ms: 1500,
            run_migrations: false,
        }
    }

    #[test]
    fn store_section_bounds_the_pool() {
        let options = PostgresPool::options(&store("postgresql://t:t@db:5432/territorios"));
        assert_eq!(options.get_max_connections(), 4);
        assert_eq!(options.get_acquire_timeout(), Duration::from_millis(1500));
        assert_eq!(options.get_idle_timeout(), Some(IDLE_TIMEOUT));
    }

    #[tokio::test]
    async fn unparseable_url_is_a_config_error() {
        let result = PostgresPool::connect(&store("not a database url")).await;
        assert!(matches!(result, Err(DbError::Config(_))));
    }
}
