//! Periodic `system_status` broadcast.
//!
//! Publishes the combined hub, engine and notification counters to every
//! subscriber on a fixed interval.

use std::time::Duration;

use hostwatch_core::envelope::{Envelope, MSG_TYPE_SYSTEM_STATUS};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Run the status broadcast loop until `cancel` is triggered.
pub async fn run(state: AppState, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "System status broadcast started");

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("System status broadcast stopping");
                break;
            }
            _ = interval.tick() => {
                let report = state.stats_report().await;
                match Envelope::from_payload(MSG_TYPE_SYSTEM_STATUS, &report) {
                    Ok(envelope) => {
                        state.hub.publish(&envelope);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode system status");
                    }
                }
            }
        }
    }
}
