//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use finsync_core::SyncError;
use finsync_setu::SetuError;
use finsync_store::StoreError;

use crate::engine::EngineError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the resource's state does not allow the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Setu call failed.
    #[error("provider error: {0}")]
    Provider(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            Self::Provider(msg) => {
                tracing::error!(error = %msg, "Account aggregator call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    "The account aggregator request failed".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            ok: false,
            error,
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<SetuError> for ApiError {
    fn from(err: SetuError) -> Self {
        match err {
            SetuError::InvalidRange(msg) => Self::BadRequest(msg),
            other => Self::Provider(other.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        if err.is_validation() {
            Self::BadRequest(err.to_string())
        } else {
            Self::Conflict(err.to_string())
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ConsentNotFound(id) => Self::NotFound(format!("consent not found: {id}")),
            EngineError::SessionNotFound(id) => Self::NotFound(format!("data session not found: {id}")),
            EngineError::NotSubmitted(_) => Self::Conflict(err.to_string()),
            EngineError::Invalid(e) => Self::from(e),
            EngineError::Transition(e) => Self::Conflict(e.to_string()),
            EngineError::Provider(e) => Self::from(e),
            EngineError::Store(e) => Self::from(e),
        }
    }
}
