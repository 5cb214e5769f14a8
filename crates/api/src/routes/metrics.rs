//! Snapshot ingestion endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use hostwatch_core::snapshot::Snapshot;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /metrics -- queue one host snapshot for broadcast and evaluation.
///
/// Returns `202 Accepted` once queued, `400` for a snapshot without a host
/// or with a negative gauge. Never waits for the queue: a full
/// queue answers `503` so the collector can back off.
pub async fn ingest_snapshot(
    State(state): State<AppState>,
    Json(snapshot): Json<Snapshot>,
) -> AppResult<StatusCode> {
    snapshot.validate()?;

    match state.ingest.try_send(snapshot) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Full(snapshot)) => {
            tracing::warn!(host = %snapshot.host, "Ingestion queue full, rejecting snapshot");
            Err(AppError::ServiceUnavailable("ingestion queue is full".into()))
        }
        Err(TrySendError::Closed(_)) => {
            Err(AppError::InternalError("ingestion task is not running".into()))
        }
    }
}
