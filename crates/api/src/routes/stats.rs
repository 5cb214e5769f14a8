use axum::extract::State;
use axum::Json;

use crate::state::{AppState, StatsReport};

/// GET /stats -- hub, engine and notification counters.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsReport> {
    Json(state.stats_report().await)
}
