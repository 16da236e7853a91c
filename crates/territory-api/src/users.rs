//! User directory endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/users` | List users by name |
//! | `POST` | `/api/users` | Register a user |
//! | `DELETE` | `/api/users` | Delete users by id |
//! | `GET` | `/api/users/{id}` | Single user |
//! | `PATCH` | `/api/users/{id}` | Rename, change phone, (de)activate |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use territory_core::ports::UserPatch;
use territory_types::UserId;

use crate::error::ApiError;
use crate::handlers::double_option;
use crate::state::AppState;

/// Body of `POST /api/users`.
#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    /// Display name.
    pub name: String,
    /// Phone number for notifications.
    pub phone: Option<String>,
}

/// Body of `PATCH /api/users/{id}`.
#[derive(Debug, Default, Deserialize)]
#[allow(clippy::option_option)]
pub struct UpdateUserRequest {
    /// New display name.
    pub name: Option<String>,
    /// New phone; `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    /// New active flag.
    pub active: Option<bool>,
}

/// Body of `DELETE /api/users`.
#[derive(Debug, Deserialize)]
pub struct DeleteUsersRequest {
    /// Users to delete.
    pub ids: Vec<UserId>,
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::InvalidUuid(format!("{raw}: {e}")))
}

/// All users ordered by name.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.users().await?))
}

/// Register a user.
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.engine.register_user(&body.name, body.phone).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// A single user.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_user_id(&id)?;
    Ok(Json(state.engine.user(id).await?))
}

/// Update a user.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_user_id(&id)?;
    let patch = UserPatch {
        name: body.name,
        phone: body.phone,
        active: body.active,
    };
    Ok(Json(state.engine.update_user(id, patch).await?))
}

/// Delete users by id.
pub async fn delete_users(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteUsersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.engine.delete_users(&body.ids).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
