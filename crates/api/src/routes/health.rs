use axum::extract::State;
use axum::{routing::get, Json, Router};
use genrelay_comfyui::api::ServerStatus;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub render_server: ServerStatus,
}

/// GET /health -- returns service and render server health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let render_server = state.orchestrator.runner().api().check_reachable().await;

    let status = if render_server.reachable { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        render_server,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
