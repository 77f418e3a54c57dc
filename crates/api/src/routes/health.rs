use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Human-readable status message.
    pub message: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Current timestamp (UTC, RFC 3339).
    pub timestamp: String,
}

/// GET / -- service health.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "yolobridge is running",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Mount the root-level health check.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}
