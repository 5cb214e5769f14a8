//! End-to-end tests over a real socket.
//!
//! Each test serves the full router on an ephemeral port and connects with a
//! `tokio-tungstenite` client, so the upgrade, both session pumps and the
//! hub are exercised together.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hostwatch_api::background;
use hostwatch_core::envelope::{
    Envelope, MSG_TYPE_ALERT_TRIGGERED, MSG_TYPE_CONNECTED, MSG_TYPE_METRICS, MSG_TYPE_PONG,
};
use hostwatch_core::rule::Rule;
use hostwatch_core::snapshot::Snapshot;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use common::TestApp;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _response) = connect_async(format!("ws://{addr}/api/v1/ws"))
        .await
        .expect("WebSocket handshake");
    client
}

/// Read the next text frame and split it into envelopes.
///
/// The server may batch several envelopes into one frame, one per line.
async fn next_envelopes(client: &mut Client) -> Vec<Envelope> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("read error");
        if let Message::Text(text) = message {
            return text
                .as_str()
                .lines()
                .map(|line| serde_json::from_str(line).expect("envelope JSON"))
                .collect();
        }
    }
}

/// Collect envelopes until `count` have arrived.
async fn collect_envelopes(client: &mut Client, count: usize) -> Vec<Envelope> {
    let mut envelopes = Vec::new();
    while envelopes.len() < count {
        envelopes.extend(next_envelopes(client).await);
    }
    envelopes
}

/// `true` once the server has ended the session from its side.
async fn closed_by_server(client: &mut Client) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

async fn wait_for_subscribers(app: &TestApp, expected: usize) {
    let hub = app.state.hub.clone();
    common::wait_until(move || {
        let hub = hub.clone();
        async move { hub.subscriber_count().await == expected }
    })
    .await;
}

// ---------------------------------------------------------------------------
// Test: connect, receive connected, then broadcasts in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_receives_connected_then_broadcasts() {
    let app = common::build_test_app(vec![]);
    let addr = serve(&app).await;

    let mut client = connect(addr).await;
    let first = next_envelopes(&mut client).await;
    assert_eq!(first[0].message_type, MSG_TYPE_CONNECTED);
    wait_for_subscribers(&app, 1).await;

    for seq in 0..3 {
        app.state
            .hub
            .publish(&Envelope::new(MSG_TYPE_METRICS, json!({ "seq": seq })));
    }

    let received = collect_envelopes(&mut client, 3).await;
    let seqs: Vec<_> = received.iter().map(|e| e.data["seq"].as_u64().unwrap()).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
}

// ---------------------------------------------------------------------------
// Test: a ping envelope is answered with pong
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_envelope_is_answered_with_pong() {
    let app = common::build_test_app(vec![]);
    let addr = serve(&app).await;
    let mut client = connect(addr).await;
    next_envelopes(&mut client).await;

    client
        .send(Message::text(r#"{"type":"ping"}"#))
        .await
        .unwrap();

    let reply = next_envelopes(&mut client).await;
    assert_eq!(reply[0].message_type, MSG_TYPE_PONG);
}

// ---------------------------------------------------------------------------
// Test: subscribe is accepted and the session stays open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_keeps_session_open() {
    let app = common::build_test_app(vec![]);
    let addr = serve(&app).await;
    let mut client = connect(addr).await;
    next_envelopes(&mut client).await;

    client
        .send(Message::text(r#"{"type":"subscribe","data":{"topics":["metrics"]}}"#))
        .await
        .unwrap();
    client.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();

    assert_eq!(next_envelopes(&mut client).await[0].message_type, MSG_TYPE_PONG);
    assert_eq!(app.state.hub.subscriber_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: oversized and malformed messages end only the offending session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_message_closes_session() {
    let app = common::build_test_app(vec![]);
    let addr = serve(&app).await;

    let mut bystander = connect(addr).await;
    next_envelopes(&mut bystander).await;
    let mut offender = connect(addr).await;
    next_envelopes(&mut offender).await;
    wait_for_subscribers(&app, 2).await;

    let big = format!(r#"{{"type":"subscribe","data":"{}"}}"#, "x".repeat(2048));
    let _ = offender.send(Message::text(big)).await;

    assert!(closed_by_server(&mut offender).await);
    wait_for_subscribers(&app, 1).await;

    app.state
        .hub
        .publish(&Envelope::new(MSG_TYPE_METRICS, json!({ "seq": 1 })));
    assert_eq!(next_envelopes(&mut bystander).await[0].data["seq"], 1);
}

#[tokio::test]
async fn malformed_message_closes_session() {
    let app = common::build_test_app(vec![]);
    let addr = serve(&app).await;
    let mut client = connect(addr).await;
    next_envelopes(&mut client).await;

    client.send(Message::text("not json")).await.unwrap();

    assert!(closed_by_server(&mut client).await);
    wait_for_subscribers(&app, 0).await;
}

// ---------------------------------------------------------------------------
// Test: a client that never answers pings is dropped after the read deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_client_is_dropped_after_pong_wait() {
    let mut config = common::test_config();
    config.hub.pong_wait = Duration::from_millis(300);
    config.hub.write_wait = Duration::from_millis(200);
    let app = common::build_test_app_with(config, vec![]);
    let addr = serve(&app).await;

    // Never polled after the handshake, so no pong is ever sent.
    let _client = connect(addr).await;
    wait_for_subscribers(&app, 1).await;

    wait_for_subscribers(&app, 0).await;
}

// ---------------------------------------------------------------------------
// Test: an ingested snapshot reaches clients as metrics and alert_triggered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingested_snapshot_is_broadcast_and_evaluated() {
    let mut app = common::build_test_app(vec![Rule::new(1, "CPU high", "cpu", ">", 90.0)]);
    let addr = serve(&app).await;

    let (_, placeholder) = tokio::sync::mpsc::channel(1);
    let ingest_rx = std::mem::replace(&mut app.ingest_rx, placeholder);
    let cancel = CancellationToken::new();
    let ingest = tokio::spawn(background::ingest::run(
        ingest_rx,
        app.state.hub.clone(),
        app.state.engine.clone(),
        cancel.clone(),
    ));

    let mut client = connect(addr).await;
    next_envelopes(&mut client).await;
    wait_for_subscribers(&app, 1).await;

    let snapshot = Snapshot::new("web-1", chrono::Utc::now()).with_cpu(97.0);
    app.state.ingest.send(snapshot).await.unwrap();

    let received = collect_envelopes(&mut client, 2).await;
    assert_eq!(received[0].message_type, MSG_TYPE_METRICS);
    assert_eq!(received[0].data["host"], "web-1");
    assert_eq!(received[1].message_type, MSG_TYPE_ALERT_TRIGGERED);
    assert_eq!(received[1].data["rule_id"], 1);

    cancel.cancel();
    ingest.await.unwrap();
}
