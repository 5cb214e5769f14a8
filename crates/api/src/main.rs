use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hostwatch_core::store::RuleStore;
use hostwatch_events::{
    EmailConfig, EmailDelivery, NotificationDispatcher, NotificationSender, WebhookDelivery,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostwatch_api::config::ServerConfig;
use hostwatch_api::engine::AlertEngine;
use hostwatch_api::router::build_app_router;
use hostwatch_api::state::AppState;
use hostwatch_api::store::MemoryRuleStore;
use hostwatch_api::{background, ws};

/// How long to wait for each background task after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hostwatch_api=debug,hostwatch_events=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Rule store ---
    let store = match &config.rules_file {
        Some(path) => MemoryRuleStore::from_file(path)
            .unwrap_or_else(|e| panic!("Failed to load rules from '{path}': {e}")),
        None => MemoryRuleStore::new(),
    };
    tracing::info!(rules = store.rule_count().await, "Rule store ready");
    let store: Arc<dyn RuleStore> = Arc::new(store);

    // --- Notification senders ---
    let notifier = build_notifier(&config);

    // --- Broadcast hub ---
    let hub = ws::Hub::start(config.hub.clone());

    // --- Alert engine ---
    let mut engine = AlertEngine::new(config.engine.clone(), Arc::clone(&store))
        .with_hub(Arc::clone(&hub));
    if let Some(notifier) = &notifier {
        engine = engine.with_notifier(notifier.clone());
    }
    let engine = Arc::new(engine);
    engine.start().await.expect("Alert engine failed to start");

    // --- App state ---
    let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue_capacity.max(1));
    let state = AppState {
        config: Arc::new(config.clone()),
        hub: Arc::clone(&hub),
        engine: Arc::clone(&engine),
        notifier,
        ingest: ingest_tx,
    };

    // --- Background jobs ---
    let cancel = CancellationToken::new();
    let ingest_handle = tokio::spawn(background::ingest::run(
        ingest_rx,
        Arc::clone(&hub),
        Arc::clone(&engine),
        cancel.clone(),
    ));
    let status_handle = tokio::spawn(background::system_status::run(
        state.clone(),
        config.status_interval,
        cancel.clone(),
    ));
    tracing::info!("Background jobs started (ingestion, system status)");

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, ingest_handle).await;
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, status_handle).await;
    tracing::info!("Background jobs stopped");

    if let Err(e) = engine.stop().await {
        tracing::warn!(error = %e, "Alert engine stop");
    }

    let subscribers = hub.subscriber_count().await;
    tracing::info!(subscribers, "Graceful shutdown complete");
}

/// Build the notification dispatcher from whichever senders are configured.
///
/// Returns `None` when neither email nor webhook delivery is set up.
fn build_notifier(config: &ServerConfig) -> Option<NotificationDispatcher> {
    let mut senders: Vec<Arc<dyn NotificationSender>> = Vec::new();

    match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(
                smtp_host = %email.smtp_host,
                recipients = email.recipients.len(),
                "Email notifications enabled"
            );
            senders.push(Arc::new(EmailDelivery::new(email)));
        }
        None => tracing::info!("SMTP_HOST or ALERT_EMAIL_TO not set, email notifications disabled"),
    }

    match WebhookDelivery::from_env() {
        Ok(Some(webhook)) => {
            tracing::info!(url = %webhook.url(), "Webhook notifications enabled");
            senders.push(Arc::new(webhook));
        }
        Ok(None) => tracing::info!("ALERT_WEBHOOK_URL not set, webhook notifications disabled"),
        Err(e) => tracing::error!(error = %e, "Failed to build webhook client, webhook notifications disabled"),
    }

    if senders.is_empty() {
        return None;
    }
    Some(NotificationDispatcher::start(senders, config.notifications))
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
