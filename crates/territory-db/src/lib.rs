//! `PostgreSQL` persistence for the territory lifecycle engine.
//!
//! [`PgRepository`] implements the three store ports of `territory-core`
//! ([`TerritoryStore`](territory_core::ports::TerritoryStore),
//! [`DeliveryLog`](territory_core::ports::DeliveryLog),
//! [`UserDirectory`](territory_core::ports::UserDirectory)) over one
//! connection pool, so it can be handed to the engine as a single
//! `Arc<dyn Repository>`.
//!
//! # Schema
//!
//! ```text
//! users        (id, name, phone, active, created_at)
//! territories  (id, number UNIQUE, status, assigned_user -> users, revision, ...)
//! deliveries   (id, territory_number, user_id, delivered_on, returned_on, ...)
//!              UNIQUE (territory_number) WHERE returned_on IS NULL
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, and migrations
//! - [`territory_store`] -- Current state per territory, guarded updates
//! - [`delivery_store`] -- Loan cycle history
//! - [`user_store`] -- Registered users
//! - [`error`] -- Setup errors and query error classification

pub mod delivery_store;
pub mod error;
pub mod postgres;
mod rows;
pub mod territory_store;
pub mod user_store;

use sqlx::PgPool;

pub use error::{DbError, store_error};
pub use postgres::PostgresPool;

/// Every store port over one `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Wrap an open pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    /// Wrap a raw [`PgPool`].
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
