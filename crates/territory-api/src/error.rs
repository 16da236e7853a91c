//! Error types for the HTTP API.
//!
//! [`ApiError`] unifies all failure modes into a single enum that can be
//! converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. Lifecycle
//! errors map by [`ErrorKind`]; the body always carries the stable rule
//! code next to the message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use territory_core::{ErrorKind, LifecycleError};
use territory_report::ReportError;

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The engine rejected or failed the operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The history report could not be produced.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// An invalid query parameter was provided.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A UUID could not be parsed from the request path.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

/// HTTP status for an error class.
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::PreconditionFailed | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ConsistencyFault => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::CollaboratorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl ApiError {
    /// HTTP status and rule code for this error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Lifecycle(e) | Self::Report(ReportError::Lifecycle(e)) => {
                (status_for(e.kind()), e.rule())
            }
            Self::Report(ReportError::InvalidRange { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_range")
            }
            Self::Report(ReportError::TooLarge { .. }) => {
                (StatusCode::BAD_REQUEST, "report_too_large")
            }
            Self::Report(ReportError::Xlsx(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "report_render_failed")
            }
            Self::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "invalid_query"),
            Self::InvalidUuid(_) => (StatusCode::BAD_REQUEST, "invalid_uuid"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, rule) = self.classify();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(rule, error = %message, "request failed");
        } else {
            tracing::debug!(rule, error = %message, "request rejected");
        }

        let body = serde_json::json!({
            "error": message,
            "rule": rule,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use territory_core::ports::StoreError;
    use territory_types::TerritoryStatus;

    use super::*;

    #[test]
    fn cooldown_is_a_conflict_with_its_own_rule() {
        let err = ApiError::from(LifecycleError::TerritoryNotAvailable {
            number: 4,
            status: TerritoryStatus::Available,
            rest_until: NaiveDate::from_ymd_opt(2030, 1, 1),
        });
        assert_eq!(err.classify(), (StatusCode::CONFLICT, "cooldown_active"));
    }

    #[test]
    fn unavailable_store_is_503() {
        let err = ApiError::from(LifecycleError::Store {
            operation: "territory get",
            source: StoreError::Unavailable {
                message: "connection refused".to_owned(),
            },
        });
        assert_eq!(err.classify().0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn report_range_is_a_bad_request() {
        let err = ApiError::from(ReportError::InvalidRange { start: 9, end: 2 });
        assert_eq!(err.classify(), (StatusCode::BAD_REQUEST, "invalid_range"));
    }
}
