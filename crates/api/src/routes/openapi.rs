//! Minimal OpenAPI document for schema introspection.
//!
//! Assembled by hand from the operation list; the request/response
//! schemas are referenced loosely rather than fully expanded.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use yolobridge_core::operation::Operation;

use crate::state::AppState;

/// Build the OpenAPI document.
pub fn document() -> Value {
    let mut paths = serde_json::Map::new();

    paths.insert(
        "/".into(),
        json!({"get": {"summary": "Health check", "responses": {"200": {"description": "Service healthy"}}}}),
    );

    for operation in Operation::ALL {
        let name = operation.cli_name();
        paths.insert(
            format!("/{name}"),
            json!({
                "post": {
                    "summary": format!("Run the {name} operation"),
                    "requestBody": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/OperationParams"}}}},
                    "responses": {"200": {"description": "Run result", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/RunResult"}}}}}
                }
            }),
        );
        paths.insert(
            format!("/sse/{name}"),
            json!({
                "get": {
                    "summary": format!("Run the {name} operation, streaming events"),
                    "responses": {"200": {"description": "Server-sent event stream", "content": {"text/event-stream": {}}}}
                }
            }),
        );
    }

    paths.insert(
        "/runs/{run_id}".into(),
        json!({"get": {"summary": "Run state lookup", "responses": {"200": {"description": "Run snapshot"}, "404": {"description": "Unknown run"}}}}),
    );
    paths.insert(
        "/runs/{run_id}/cancel".into(),
        json!({"post": {"summary": "Cancel a run (idempotent)", "responses": {"200": {"description": "Already terminal"}, "202": {"description": "Cancellation signalled"}}}}),
    );

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "yolobridge",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": Value::Object(paths),
    })
}

/// GET /openapi.json
async fn openapi_json() -> Json<Value> {
    Json(document())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}
