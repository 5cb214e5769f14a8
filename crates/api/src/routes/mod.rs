pub mod health;
pub mod metrics;
pub mod stats;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                              WebSocket live updates
/// /metrics                                         ingest snapshot (POST)
/// /stats                                           hub/engine counters
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", post(metrics::ingest_snapshot))
        .route("/stats", get(stats::get_stats))
}
