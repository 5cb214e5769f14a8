//! One live WebSocket subscriber.
//!
//! A session registers with the [`Hub`], then runs two pumps over the split
//! socket until either side gives up:
//!
//!   * the write pump (spawned) drains the subscriber queue, batching frames
//!     that are already waiting into one text message, and pings the peer
//!     every [`HubConfig::ping_period`];
//!   * the read pump (current task) enforces the size limit and the read
//!     deadline, which only a pong pushes forward, and answers `ping`
//!     envelopes.
//!
//! The pumps share a [`CancellationToken`]: whichever stops first cancels
//! the other. The session then unregisters from the hub.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hostwatch_core::envelope::{
    Envelope, MSG_TYPE_PING, MSG_TYPE_PONG, MSG_TYPE_SUBSCRIBE, MSG_TYPE_UNSUBSCRIBE,
};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::ws::hub::{Hub, HubConfig, SubscriberId, Subscription};

/// Pending direct replies (pongs) before further ones are dropped.
const REPLY_QUEUE_CAPACITY: usize = 8;

/// Separator between envelopes batched into one text frame.
const BATCH_SEPARATOR: char = '\n';

/// Why a session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("no pong within {0:?}")]
    ReadTimeout(Duration),

    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

/// Drive one upgraded socket until it closes.
pub async fn run(socket: WebSocket, hub: Arc<Hub>) {
    let Subscription { id, receiver } = hub.register();
    let config = hub.config().clone();
    tracing::info!(subscriber_id = %id, "WebSocket session opened");

    let (sink, stream) = socket.split();
    let cancel = CancellationToken::new();
    let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_CAPACITY);

    let mut writer = tokio::spawn(write_pump(
        id,
        sink,
        receiver,
        reply_rx,
        config.clone(),
        cancel.clone(),
    ));

    let read_result = read_pump(id, stream, &hub, reply_tx, &config, &cancel).await;
    cancel.cancel();
    hub.unregister(id);

    // The write pump only needs to push out a close frame now.
    let write_result = match tokio::time::timeout(config.write_wait, &mut writer).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(subscriber_id = %id, error = %e, "WebSocket write pump panicked");
            Ok(())
        }
        Err(_) => {
            writer.abort();
            Err(SessionError::WriteTimeout(config.write_wait))
        }
    };

    match read_result.err().or(write_result.err()) {
        Some(reason) => {
            tracing::info!(subscriber_id = %id, %reason, "WebSocket session dropped")
        }
        None => tracing::info!(subscriber_id = %id, "WebSocket session closed"),
    }
}

// ---------------------------------------------------------------------------
// Write pump
// ---------------------------------------------------------------------------

async fn write_pump(
    id: SubscriberId,
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Utf8Bytes>,
    mut replies: mpsc::Receiver<Message>,
    config: HubConfig,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let period = config.ping_period();
    let mut ping = tokio::time::interval_at(Instant::now() + period, period);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            frame = queue.recv() => {
                let Some(first) = frame else {
                    // The hub dropped us: unregistered or shed for overflow.
                    tracing::debug!(subscriber_id = %id, "Subscriber queue closed by hub");
                    break Ok(());
                };
                let batch = coalesce(first, &mut queue);
                if let Err(e) = write_frame(&mut sink, Message::Text(batch), config.write_wait).await {
                    break Err(e);
                }
            }
            Some(reply) = replies.recv() => {
                if let Err(e) = write_frame(&mut sink, reply, config.write_wait).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    break Err(e);
                }
            }
        }
    };

    cancel.cancel();
    if result.is_ok() {
        let _ = write_frame(&mut sink, Message::Close(None), config.write_wait).await;
    }
    result
}

/// Join `first` with every frame already waiting behind it.
///
/// Only frames queued at the time of the call are taken, so a fast producer
/// cannot keep one write growing forever.
fn coalesce(
    first: Utf8Bytes,
    queue: &mut mpsc::Receiver<Utf8Bytes>,
) -> Utf8Bytes {
    let waiting = queue.len();
    if waiting == 0 {
        return first;
    }

    let mut batch = String::from(first.as_str());
    for _ in 0..waiting {
        match queue.try_recv() {
            Ok(next) => {
                batch.push(BATCH_SEPARATOR);
                batch.push_str(next.as_str());
            }
            Err(_) => break,
        }
    }
    batch.into()
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    deadline: Duration,
) -> Result<(), SessionError> {
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SessionError::WriteTimeout(deadline)),
    }
}

// ---------------------------------------------------------------------------
// Read pump
// ---------------------------------------------------------------------------

async fn read_pump(
    id: SubscriberId,
    mut stream: SplitStream<WebSocket>,
    hub: &Hub,
    replies: mpsc::Sender<Message>,
    config: &HubConfig,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let deadline = tokio::time::sleep(config.pong_wait);
    tokio::pin!(deadline);

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = &mut deadline => return Err(SessionError::ReadTimeout(config.pong_wait)),
            message = stream.next() => message,
        };

        match message {
            None | Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Pong(_))) => {
                deadline.as_mut().reset(Instant::now() + config.pong_wait);
                hub.heartbeat(id);
            }
            // Answered by the transport.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                return Err(SessionError::Protocol("binary messages are not accepted"))
            }
            Some(Ok(Message::Text(text))) => {
                handle_text(id, text.as_str(), hub, &replies, config.max_message_bytes)?
            }
        }
    }
}

fn handle_text(
    id: SubscriberId,
    text: &str,
    hub: &Hub,
    replies: &mpsc::Sender<Message>,
    limit: usize,
) -> Result<(), SessionError> {
    if text.len() > limit {
        return Err(SessionError::MessageTooLarge {
            size: text.len(),
            limit,
        });
    }

    let inbound: Envelope = serde_json::from_str(text)?;
    match inbound.message_type.as_str() {
        MSG_TYPE_PING => {
            hub.heartbeat(id);
            let pong = Envelope::new(MSG_TYPE_PONG, serde_json::Value::Null).to_json()?;
            if replies.try_send(Message::Text(pong.into())).is_err() {
                tracing::debug!(subscriber_id = %id, "Reply queue full, dropping pong");
            }
        }
        MSG_TYPE_SUBSCRIBE | MSG_TYPE_UNSUBSCRIBE => {
            tracing::debug!(
                subscriber_id = %id,
                message_type = %inbound.message_type,
                topics = %inbound.data,
                "Subscription request acknowledged"
            );
        }
        other => {
            tracing::debug!(subscriber_id = %id, message_type = other, "Ignoring unknown message type");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesce_joins_only_frames_already_waiting() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send("b".into()).await.unwrap();
        tx.send("c".into()).await.unwrap();

        let batch = coalesce("a".into(), &mut rx);
        assert_eq!(batch.as_str(), "a\nb\nc");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn coalesce_single_frame_is_unchanged() {
        let (_tx, mut rx) = mpsc::channel::<Utf8Bytes>(8);
        let batch = coalesce("{\"type\":\"metrics\"}".into(), &mut rx);
        assert_eq!(batch.as_str(), "{\"type\":\"metrics\"}");
    }

    #[tokio::test]
    async fn ping_envelope_gets_pong_reply() {
        let (hub, _hub_loop) = Hub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::channel(1);

        handle_text(uuid::Uuid::new_v4(), r#"{"type":"ping"}"#, &hub, &tx, 512).unwrap();

        let Message::Text(reply) = rx.try_recv().unwrap() else {
            panic!("expected a text reply");
        };
        let envelope: Envelope = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(envelope.message_type, MSG_TYPE_PONG);
    }

    #[tokio::test]
    async fn oversized_and_malformed_messages_are_rejected() {
        let (hub, _hub_loop) = Hub::new(HubConfig::default());
        let (tx, _rx) = mpsc::channel(1);
        let id = uuid::Uuid::new_v4();

        let big = format!(r#"{{"type":"subscribe","data":"{}"}}"#, "x".repeat(600));
        assert!(matches!(
            handle_text(id, &big, &hub, &tx, 512),
            Err(SessionError::MessageTooLarge { limit: 512, .. })
        ));
        assert!(matches!(
            handle_text(id, "not json", &hub, &tx, 512),
            Err(SessionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_is_accepted() {
        let (hub, _hub_loop) = Hub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::channel(1);

        handle_text(
            uuid::Uuid::new_v4(),
            r#"{"type":"subscribe","data":["metrics"]}"#,
            &hub,
            &tx,
            512,
        )
        .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
