//! HTTP JSON API for the territory lifecycle service.
//!
//! This crate exposes the [`LifecycleEngine`](territory_core::LifecycleEngine)
//! over Axum:
//!
//! - **Territory endpoints** for listing, creating, editing, and deleting
//!   territories
//! - **Lifecycle endpoints** for Assign, Extend, and Return; a successful
//!   Assign queues the notification without waiting for it
//! - **Sweep endpoints** to run the expiry and cooldown sweeps on demand
//! - **User endpoints** for the user directory
//! - **History endpoints** for delivery records and the XLSX report
//!
//! Every failure is rendered as `{error, rule, status}` with the HTTP status
//! derived from the error class (see [`error`]).

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod users;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::AppState;
