//! Territory, lifecycle, sweep, and report endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness |
//! | `GET` | `/api/territories` | List territories (optional `?status=`) |
//! | `POST` | `/api/territories` | Create a territory |
//! | `DELETE` | `/api/territories` | Delete territories by number |
//! | `GET` | `/api/territories/due-soon` | Loans closest to their due date |
//! | `GET` | `/api/territories/{number}` | Single territory |
//! | `PATCH` | `/api/territories/{number}` | Edit document link or comment |
//! | `POST` | `/api/territories/{number}/assign` | Assign to a user |
//! | `POST` | `/api/territories/{number}/extend` | Extend the loan |
//! | `POST` | `/api/territories/{number}/return` | Return the territory |
//! | `GET` | `/api/summary` | Counts per status |
//! | `POST` | `/api/sweeps/expire` | Run the expiry sweep |
//! | `POST` | `/api/sweeps/cooldown` | Run the cooldown release |
//! | `GET` | `/api/deliveries` | Delivery history (optional `?territory=`) |
//! | `GET` | `/api/reports/history` | XLSX history (`?start=&end=`) |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use territory_core::admin::NewTerritory;
use territory_core::ports::TerritoryFilter;
use territory_core::{AssignRequest, ReturnRequest};
use territory_report::{FILE_NAME, HistoryRange, render_history};
use territory_types::{TerritoryStatus, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Content type of the history workbook.
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Distinguish an absent field (`None`) from an explicit `null`
/// (`Some(None)`).
#[allow(clippy::option_option)]
pub(crate) fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

// ---------------------------------------------------------------------------
// Request bodies and query parameters
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/territories`.
#[derive(Debug, Deserialize)]
pub struct TerritoriesQuery {
    /// Status name, Spanish or English.
    pub status: Option<String>,
}

/// Body of `POST /api/territories`.
#[derive(Debug, Deserialize)]
pub struct CreateTerritoryRequest {
    /// Human-facing number.
    pub number: u32,
    /// Link to the map document.
    pub document_url: Option<String>,
    /// Initial note.
    pub comment: Option<String>,
}

/// Body of `DELETE /api/territories`.
#[derive(Debug, Deserialize)]
pub struct DeleteTerritoriesRequest {
    /// Numbers to delete.
    pub numbers: Vec<u32>,
}

/// Body of `PATCH /api/territories/{number}`. Absent fields are left
/// alone; `null` clears.
#[derive(Debug, Default, Deserialize)]
#[allow(clippy::option_option)]
pub struct EditTerritoryRequest {
    /// New document link.
    #[serde(default, deserialize_with = "double_option")]
    pub document_url: Option<Option<String>>,
    /// New comment.
    #[serde(default, deserialize_with = "double_option")]
    pub comment: Option<Option<String>>,
}

/// Body of `POST /api/territories/{number}/assign`.
#[derive(Debug, Deserialize)]
pub struct AssignBody {
    /// Receiving user.
    pub user_id: UserId,
    /// Due date; defaults to the configured window.
    pub due_date: Option<NaiveDate>,
    /// Special campaign loan.
    #[serde(default)]
    pub special: bool,
    /// Note stored on the territory.
    pub comment: Option<String>,
}

/// Body of `POST /api/territories/{number}/extend`.
#[derive(Debug, Default, Deserialize)]
pub struct ExtendBody {
    /// Months to add; defaults to the configured extension.
    #[serde(default)]
    pub months: Option<u32>,
}

/// Body of `POST /api/territories/{number}/return`.
#[derive(Debug, Default, Deserialize)]
pub struct ReturnBody {
    /// Return date; defaults to today.
    #[serde(default)]
    pub returned_on: Option<NaiveDate>,
    /// Note stored on the closed delivery record.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Query parameters for `GET /api/territories/due-soon`.
#[derive(Debug, Deserialize)]
pub struct DueSoonQuery {
    /// Maximum rows.
    pub limit: Option<usize>,
}

/// Query parameters for `GET /api/deliveries`.
#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    /// Restrict to one territory number.
    pub territory: Option<u32>,
}

/// Query parameters for `GET /api/reports/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryReportQuery {
    /// First territory number.
    pub start: Option<u32>,
    /// Last territory number.
    pub end: Option<u32>,
}

// ---------------------------------------------------------------------------
// Health and dashboard
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Counts per status for the dashboard cards.
pub async fn summary(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.status_summary().await?))
}

/// Loans closest to their due date.
pub async fn due_soon(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DueSoonQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.due_soon(query.limit).await?))
}

// ---------------------------------------------------------------------------
// Territories
// ---------------------------------------------------------------------------

/// List territories, optionally by status.
pub async fn list_territories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TerritoriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = match query.status.as_deref() {
        Some(status) => {
            let status: TerritoryStatus = status
                .parse()
                .map_err(|e| ApiError::InvalidQuery(format!("{e}")))?;
            TerritoryFilter::status(status)
        }
        None => TerritoryFilter::default(),
    };
    Ok(Json(state.engine.territories(&filter).await?))
}

/// Create a territory.
pub async fn create_territory(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTerritoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .engine
        .create_territory(NewTerritory {
            number: body.number,
            document_url: body.document_url,
            comment: body.comment,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Delete territories by number.
pub async fn delete_territories(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteTerritoriesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.engine.delete_territories(&body.numbers).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// A single territory.
pub async fn get_territory(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u32>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.territory(number).await?))
}

/// Edit the document link and/or comment.
pub async fn edit_territory(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u32>,
    Json(body): Json<EditTerritoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut territory = None;
    if let Some(url) = body.document_url {
        territory = Some(state.engine.set_document(number, url).await?);
    }
    if let Some(comment) = body.comment {
        territory = Some(state.engine.annotate(number, comment).await?);
    }
    let territory = match territory {
        Some(t) => t,
        None => state.engine.territory(number).await?,
    };
    Ok(Json(territory))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Assign a territory and queue the notification.
pub async fn assign(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u32>,
    Json(body): Json<AssignBody>,
) -> Result<impl IntoResponse, ApiError> {
    let assignment = state
        .engine
        .assign(AssignRequest {
            number,
            user: body.user_id,
            due_date: body.due_date,
            special: body.special,
            comment: body.comment,
        })
        .await?;
    if let Some(notifications) = &state.notifications {
        // Fire and forget; delivery problems are logged by the task.
        drop(notifications.dispatch(&assignment));
    }
    Ok(Json(assignment))
}

/// Extend a loan.
pub async fn extend(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u32>,
    Json(body): Json<ExtendBody>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.extend(number, body.months).await?))
}

/// Return a territory.
pub async fn return_territory(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u32>,
    Json(body): Json<ReturnBody>,
) -> Result<impl IntoResponse, ApiError> {
    let returned_on = body.returned_on.unwrap_or_else(|| state.engine.today());
    let returned = state
        .engine
        .return_territory(ReturnRequest {
            number,
            returned_on,
            comment: body.comment,
        })
        .await?;
    Ok(Json(returned))
}

// ---------------------------------------------------------------------------
// Sweeps
// ---------------------------------------------------------------------------

/// Run the expiry sweep now.
pub async fn expire_sweep(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.expire_sweep().await?))
}

/// Run the cooldown release now.
pub async fn cooldown_release(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.cooldown_release().await?))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Delivery records, newest first.
pub async fn deliveries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.history(query.territory).await?))
}

/// The closed-cycle history as an XLSX download.
pub async fn history_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let range = match (query.start, query.end) {
        (Some(start), Some(end)) => Some(HistoryRange::new(start, end)?),
        (None, None) => None,
        _ => {
            return Err(ApiError::InvalidQuery(
                "start and end must be given together".to_owned(),
            ));
        }
    };
    let bytes = render_history(&state.engine, range, &state.report).await?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{FILE_NAME}\""),
            ),
        ],
        bytes,
    ))
}
