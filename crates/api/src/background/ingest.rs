//! Snapshot ingestion.
//!
//! Drains the bounded queue fed by `POST /api/v1/metrics`. For each
//! snapshot it publishes a `metrics` envelope to the hub and then runs the
//! alert engine over it. Snapshots are handled one at a time, in arrival
//! order.

use std::sync::Arc;

use hostwatch_core::envelope::{Envelope, MSG_TYPE_METRICS};
use hostwatch_core::snapshot::Snapshot;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::AlertEngine;
use crate::ws::Hub;

/// Run the ingestion loop.
///
/// Returns when `cancel` is triggered or every sender has been dropped.
pub async fn run(
    mut snapshots: mpsc::Receiver<Snapshot>,
    hub: Arc<Hub>,
    engine: Arc<AlertEngine>,
    cancel: CancellationToken,
) {
    tracing::info!("Snapshot ingestion started");

    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => break,
            snapshot = snapshots.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => break,
            },
        };
        ingest(&snapshot, &hub, &engine).await;
    }

    tracing::info!("Snapshot ingestion stopping");
}

async fn ingest(snapshot: &Snapshot, hub: &Hub, engine: &AlertEngine) {
    match Envelope::from_payload(MSG_TYPE_METRICS, snapshot) {
        Ok(envelope) => {
            hub.publish(&envelope);
        }
        Err(e) => {
            tracing::error!(host = %snapshot.host, error = %e, "Failed to encode snapshot");
        }
    }

    let fired = engine.evaluate(snapshot).await;
    if !fired.is_empty() {
        tracing::debug!(host = %snapshot.host, fired = fired.len(), "Snapshot evaluated");
    }
}
