pub mod health;
pub mod openapi;
pub mod ops;
pub mod runs;
pub mod sse;

use axum::Router;

use crate::state::AppState;

/// Build the full route tree.
///
/// ```text
/// GET  /                   health check
/// GET  /openapi.json       schema introspection
///
/// POST /{operation}        run an operation, respond with the RunResult
/// GET  /sse/{operation}    run an operation, stream events then complete
/// POST /sse/{operation}    same, parameters in the JSON body
///
/// GET  /runs/{id}          run state / result lookup
/// POST /runs/{id}/cancel   cancel a run (idempotent)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(openapi::router())
        .merge(sse::router())
        .merge(runs::router())
        // Last: the operation catch-all (`/{operation}`).
        .merge(ops::router())
}
