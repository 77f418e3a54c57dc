//! The synchronous HTTP channel: one POST per operation, blocking until
//! the run reaches a terminal state.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};

use yolobridge_core::operation::{Operation, OperationParams, OperationRequest};
use yolobridge_core::result::RunResult;
use yolobridge_runner::ChannelKind;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /{operation}
///
/// Body: recognized parameters plus the optional `extra_args` map.
/// Blocks until terminal (bounded by the engine's run timeout) and
/// responds with the full [`RunResult`], including failures — only
/// validation and conflict errors produce a non-200 status.
async fn run_operation(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Json(params): Json<OperationParams>,
) -> ApiResult<Json<RunResult>> {
    let operation: Operation = operation
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown operation '{operation}'")))?;

    let result = state
        .engine
        .submit(
            OperationRequest { operation, params },
            ChannelKind::Http,
            None,
        )
        .await?;

    Ok(Json(result))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{operation}", post(run_operation))
}
