#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use hostwatch_core::rule::Rule;
use hostwatch_core::snapshot::Snapshot;
use tokio::sync::mpsc;
use tower::ServiceExt;

use hostwatch_api::config::ServerConfig;
use hostwatch_api::engine::{AlertEngine, AlertEngineConfig};
use hostwatch_api::router::build_app_router;
use hostwatch_api::state::AppState;
use hostwatch_api::store::MemoryRuleStore;
use hostwatch_api::ws::{Hub, HubConfig};

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ingest_queue_capacity: 4,
        ..ServerConfig::default()
    }
}

/// Everything a test needs to drive the app and look behind it.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryRuleStore>,
    /// The ingestion queue's receiving end. No ingestion task is running,
    /// so tests decide when (and whether) snapshots are drained.
    pub ingest_rx: mpsc::Receiver<Snapshot>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &self.state.config)
    }
}

/// Build the full application state over an in-memory store seeded with
/// `rules`, with a running hub and an engine that has not been started.
pub fn build_test_app(rules: Vec<Rule>) -> TestApp {
    build_test_app_with(test_config(), rules)
}

pub fn build_test_app_with(config: ServerConfig, rules: Vec<Rule>) -> TestApp {
    let store = Arc::new(MemoryRuleStore::with_rules(rules).expect("valid test rules"));
    let hub = Hub::start(config.hub.clone());
    let engine = Arc::new(
        AlertEngine::new(config.engine.clone(), store.clone()).with_hub(Arc::clone(&hub)),
    );
    let (ingest, ingest_rx) = mpsc::channel(config.ingest_queue_capacity);

    let state = AppState {
        config: Arc::new(config),
        hub,
        engine,
        notifier: None,
        ingest,
    };

    TestApp {
        state,
        store,
        ingest_rx,
    }
}

/// Hub settings small enough to make overflow easy to provoke.
pub fn small_hub_config(broadcast_capacity: usize, send_queue_capacity: usize) -> HubConfig {
    HubConfig {
        broadcast_capacity,
        send_queue_capacity,
        ..HubConfig::default()
    }
}

pub fn engine_config() -> AlertEngineConfig {
    AlertEngineConfig::default()
}

/// Issue a GET request against the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Issue a POST request with a JSON body against the router.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `check` until it returns `true` or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
