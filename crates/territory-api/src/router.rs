//! Axum router construction for the territory API.
//!
//! Assembles all routes into a single [`Router`] with request tracing and
//! CORS enabled for the browser front end.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, users};

/// Build the complete Axum router.
///
/// See [`handlers`] and [`users`] for the endpoint tables. CORS allows any
/// origin; deployments behind a reverse proxy restrict it there.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Territories
        .route(
            "/api/territories",
            get(handlers::list_territories)
                .post(handlers::create_territory)
                .delete(handlers::delete_territories),
        )
        .route("/api/territories/due-soon", get(handlers::due_soon))
        .route(
            "/api/territories/{number}",
            get(handlers::get_territory).patch(handlers::edit_territory),
        )
        .route("/api/territories/{number}/assign", post(handlers::assign))
        .route("/api/territories/{number}/extend", post(handlers::extend))
        .route(
            "/api/territories/{number}/return",
            post(handlers::return_territory),
        )
        // Dashboard and sweeps
        .route("/api/summary", get(handlers::summary))
        .route("/api/sweeps/expire", post(handlers::expire_sweep))
        .route("/api/sweeps/cooldown", post(handlers::cooldown_release))
        // Users
        .route(
            "/api/users",
            get(users::list_users)
                .post(users::register_user)
                .delete(users::delete_users),
        )
        .route(
            "/api/users/{id}",
            get(users::get_user).patch(users::update_user),
        )
        // History
        .route("/api/deliveries", get(handlers::deliveries))
        .route("/api/reports/history", get(handlers::history_report))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
