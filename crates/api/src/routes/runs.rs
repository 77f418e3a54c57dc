//! Run lookup and cancellation endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use yolobridge_core::error::RunError;
use yolobridge_runner::registry::CancelOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /runs/{run_id}
///
/// Returns the run's current snapshot: state, command, creation time,
/// and — once terminal — the stored result.
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .engine
        .registry()
        .get(&run_id)
        .ok_or(ApiError::Run(RunError::NotFound(run_id)))?;
    Ok(Json(snapshot))
}

/// POST /runs/{run_id}/cancel
///
/// Idempotent: a live run gets its cancellation token triggered (202);
/// an already-terminal run is a no-op returning the stored result (200).
async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.engine.registry();
    match registry.request_cancel(&run_id)? {
        CancelOutcome::Signalled => {
            tracing::info!(run_id = %run_id, "Cancellation requested");
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "run_id": run_id, "state": "cancelling" })),
            )
                .into_response())
        }
        CancelOutcome::AlreadyTerminal(result) => {
            let state_str = registry
                .get(&run_id)
                .map(|s| s.state.as_str())
                .unwrap_or("unknown");
            Ok((
                StatusCode::OK,
                Json(json!({ "run_id": run_id, "state": state_str, "result": result })),
            )
                .into_response())
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/cancel", post(cancel_run))
}
