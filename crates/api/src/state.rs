use std::sync::Arc;

use hostwatch_core::snapshot::Snapshot;
use hostwatch_events::{DispatcherStats, NotificationDispatcher};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::engine::{AlertEngine, EngineStats};
use crate::ws::{Hub, HubStats};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Live-update fan-out.
    pub hub: Arc<Hub>,
    pub engine: Arc<AlertEngine>,
    /// `None` when no email or webhook sender is configured.
    pub notifier: Option<NotificationDispatcher>,
    /// Snapshots waiting for the ingestion task.
    pub ingest: mpsc::Sender<Snapshot>,
}

/// Combined counters served by `GET /api/v1/stats` and broadcast as
/// `system_status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub hub: HubStats,
    pub engine: EngineStats,
    pub notifications: Option<DispatcherStats>,
    pub ingest_queue_depth: usize,
}

impl AppState {
    pub async fn stats_report(&self) -> StatsReport {
        StatsReport {
            hub: self.hub.stats().await,
            engine: self.engine.stats().await,
            notifications: self.notifier.as_ref().map(NotificationDispatcher::stats),
            ingest_queue_depth: self.ingest.max_capacity() - self.ingest.capacity(),
        }
    }
}
