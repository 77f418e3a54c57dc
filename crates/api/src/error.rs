use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use yolobridge_core::error::RunError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`RunError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A domain-level error from the execution layer.
    #[error(transparent)]
    Run(#[from] RunError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Run(run) => {
                let status = match run {
                    RunError::Validation(_) => StatusCode::BAD_REQUEST,
                    RunError::Conflict(_) => StatusCode::CONFLICT,
                    RunError::NotFound(_) => StatusCode::NOT_FOUND,
                    // Spawn/Timeout/Cancelled are normally reported inside
                    // a RunResult; reaching here means an internal slip.
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, run.code(), run.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
