use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the alert engine's sweep is running.
    pub alerts_running: bool,
    pub subscribers: usize,
}

/// GET /health -- returns service health.
///
/// Reports `degraded` when alerting is enabled but the engine is stopped.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let alerts_running = state.engine.is_running().await;
    let degraded = state.engine.config().enabled && !alerts_running;

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        alerts_running,
        subscribers: state.hub.subscriber_count().await,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
