use std::sync::Arc;

use yolobridge_runner::RunEngine;

use crate::config::ServerConfig;

/// Shared application state available to all axum handlers via
/// `State<AppState>`. Cheaply cloneable; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The execution engine shared by the HTTP and SSE channels.
    pub engine: Arc<RunEngine>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
