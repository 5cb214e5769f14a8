//! Broadcast hub for live subscribers.
//!
//! The subscriber registry is owned by a single control loop ([`HubLoop`]).
//! Everything else talks to it through channels:
//!
//! - a control channel carrying register / unregister / heartbeat commands;
//! - a bounded broadcast channel carrying serialized envelopes.
//!
//! [`Hub::publish`] never waits. If the broadcast channel is full the
//! message is dropped for everyone. When fanning out, the loop does a
//! non-blocking push onto each subscriber's own bounded queue; a subscriber
//! whose queue is full is disconnected instead of being waited on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use hostwatch_core::envelope::{Envelope, MSG_TYPE_CONNECTED};
use hostwatch_core::types::Timestamp;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifier assigned to each subscriber on registration.
pub type SubscriberId = Uuid;

/// Default bound of the global broadcast queue.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Default bound of each subscriber's outbound queue.
const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Default deadline for a single socket write.
const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default read deadline; refreshed by every pong.
const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default maximum inbound message size in bytes.
const DEFAULT_MAX_MESSAGE_BYTES: usize = 512;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Queue bounds and session timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub broadcast_capacity: usize,
    pub send_queue_capacity: usize,
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub max_message_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl HubConfig {
    /// Interval between server pings: 9/10 of the read deadline, so a ping
    /// always lands before the peer's deadline expires.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Registry entry for one live subscriber. Owned by the control loop.
struct Subscriber {
    sender: mpsc::Sender<Utf8Bytes>,
    connected_at: Timestamp,
    last_heartbeat: Timestamp,
}

/// Handed to the session on registration.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    /// Outbound frames for this subscriber. Yields `None` once the hub has
    /// dropped the subscriber (unregistered or shed for overflow).
    pub receiver: mpsc::Receiver<Utf8Bytes>,
}

enum Command {
    Register {
        id: SubscriberId,
        sender: mpsc::Sender<Utf8Bytes>,
    },
    Unregister(SubscriberId),
    Heartbeat(SubscriberId),
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Envelopes waiting in the broadcast queue.
    pub broadcast_queue_depth: usize,
    pub broadcast_queue_capacity: usize,
    /// Envelopes dropped because the broadcast queue was full.
    pub dropped_messages: u64,
    /// Subscribers disconnected because their own queue was full.
    pub shed_subscribers: u64,
}

/// Written by the control loop only; read by [`Hub::stats`].
#[derive(Debug, Default)]
struct RegistryStats {
    subscribers: usize,
    shed_subscribers: u64,
}

// ---------------------------------------------------------------------------
// Hub (handle)
// ---------------------------------------------------------------------------

/// Cloneable-by-`Arc` handle used by producers and sessions.
pub struct Hub {
    config: HubConfig,
    commands: mpsc::UnboundedSender<Command>,
    broadcast: mpsc::Sender<Utf8Bytes>,
    registry_stats: Arc<RwLock<RegistryStats>>,
    dropped_messages: AtomicU64,
}

impl Hub {
    /// Create the hub handle and its (not yet running) control loop.
    ///
    /// The loop must be spawned (`tokio::spawn(hub_loop.run())`) before
    /// registrations or publishes take effect.
    pub fn new(config: HubConfig) -> (Arc<Self>, HubLoop) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (broadcast, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let registry_stats = Arc::new(RwLock::new(RegistryStats::default()));

        let hub = Arc::new(Self {
            config: config.clone(),
            commands,
            broadcast,
            registry_stats: Arc::clone(&registry_stats),
            dropped_messages: AtomicU64::new(0),
        });

        let hub_loop = HubLoop {
            send_queue_capacity: config.send_queue_capacity.max(1),
            commands: commands_rx,
            broadcast: broadcast_rx,
            subscribers: HashMap::new(),
            registry_stats,
        };

        (hub, hub_loop)
    }

    /// Create the hub and spawn its control loop on the current runtime.
    pub fn start(config: HubConfig) -> Arc<Self> {
        let (hub, hub_loop) = Self::new(config);
        tokio::spawn(hub_loop.run());
        hub
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new subscriber.
    ///
    /// The control loop adds it to the registry and queues a one-time
    /// `connected` envelope for it alone.
    pub fn register(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.config.send_queue_capacity.max(1));
        if self.commands.send(Command::Register { id, sender }).is_err() {
            tracing::warn!(subscriber_id = %id, "Hub loop stopped, registration ignored");
        }
        Subscription { id, receiver }
    }

    /// Remove a subscriber and close its outbound queue.
    ///
    /// Unknown or already-removed ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Record that a subscriber showed signs of life.
    pub fn heartbeat(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Heartbeat(id));
    }

    /// Serialize and queue an envelope for every subscriber.
    ///
    /// Never waits. Returns `false` if the envelope was dropped.
    pub fn publish(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(text) => self.publish_text(text.into()),
            Err(e) => {
                tracing::error!(
                    message_type = %envelope.message_type,
                    error = %e,
                    "Failed to serialize envelope"
                );
                false
            }
        }
    }

    /// Queue an already-serialized frame for every subscriber.
    pub fn publish_text(&self, text: Utf8Bytes) -> bool {
        match self.broadcast.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    capacity = self.config.broadcast_capacity,
                    "Broadcast queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Hub loop stopped, dropping message");
                false
            }
        }
    }

    pub async fn stats(&self) -> HubStats {
        let registry = self.registry_stats.read().await;
        HubStats {
            subscribers: registry.subscribers,
            broadcast_queue_depth: self.broadcast.max_capacity() - self.broadcast.capacity(),
            broadcast_queue_capacity: self.broadcast.max_capacity(),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            shed_subscribers: registry.shed_subscribers,
        }
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.registry_stats.read().await.subscribers
    }
}

// ---------------------------------------------------------------------------
// HubLoop (control actor)
// ---------------------------------------------------------------------------

/// The control loop. Sole owner and writer of the subscriber registry.
pub struct HubLoop {
    send_queue_capacity: usize,
    commands: mpsc::UnboundedReceiver<Command>,
    broadcast: mpsc::Receiver<Utf8Bytes>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    registry_stats: Arc<RwLock<RegistryStats>>,
}

impl HubLoop {
    /// Run until every [`Hub`] handle has been dropped.
    ///
    /// Control commands are drained ahead of broadcasts so a subscriber
    /// registered before a publish sees that publish.
    pub async fn run(mut self) {
        tracing::info!(
            send_queue_capacity = self.send_queue_capacity,
            "Broadcast hub started"
        );

        loop {
            tokio::select! {
                biased;
                Some(command) = self.commands.recv() => self.handle_command(command).await,
                Some(frame) = self.broadcast.recv() => self.fan_out(frame).await,
                else => break,
            }
        }

        tracing::info!(
            subscribers = self.subscribers.len(),
            "Broadcast hub stopped"
        );
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register { id, sender } => {
                let now = chrono::Utc::now();
                if let Some(frame) = connected_frame(id) {
                    // Fresh queue: only fails if the session already went away.
                    let _ = sender.try_send(frame);
                }
                self.subscribers.insert(
                    id,
                    Subscriber {
                        sender,
                        connected_at: now,
                        last_heartbeat: now,
                    },
                );
                tracing::info!(
                    subscriber_id = %id,
                    subscribers = self.subscribers.len(),
                    "Subscriber registered"
                );
                self.publish_registry_stats(0).await;
            }
            Command::Unregister(id) => {
                // Dropping the entry drops the only sender, closing the queue.
                if let Some(sub) = self.subscribers.remove(&id) {
                    let connected_secs = (chrono::Utc::now() - sub.connected_at).num_seconds();
                    tracing::info!(
                        subscriber_id = %id,
                        connected_secs,
                        subscribers = self.subscribers.len(),
                        "Subscriber unregistered"
                    );
                    self.publish_registry_stats(0).await;
                }
            }
            Command::Heartbeat(id) => {
                if let Some(sub) = self.subscribers.get_mut(&id) {
                    sub.last_heartbeat = chrono::Utc::now();
                    tracing::trace!(subscriber_id = %id, "Subscriber heartbeat");
                }
            }
        }
    }

    async fn fan_out(&mut self, frame: Utf8Bytes) {
        let mut shed = Vec::new();
        let mut gone = Vec::new();

        for (id, sub) in &self.subscribers {
            match sub.sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => shed.push(*id),
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        if shed.is_empty() && gone.is_empty() {
            return;
        }

        for id in &shed {
            if let Some(sub) = self.subscribers.remove(id) {
                let silent_secs = (chrono::Utc::now() - sub.last_heartbeat).num_seconds();
                tracing::warn!(
                    subscriber_id = %id,
                    silent_secs,
                    "Subscriber send queue full, disconnecting slow subscriber"
                );
            }
        }
        for id in &gone {
            self.subscribers.remove(id);
            tracing::debug!(subscriber_id = %id, "Subscriber queue closed, removing");
        }

        self.publish_registry_stats(shed.len() as u64).await;
    }

    async fn publish_registry_stats(&self, newly_shed: u64) {
        let mut stats = self.registry_stats.write().await;
        stats.subscribers = self.subscribers.len();
        stats.shed_subscribers += newly_shed;
    }
}

fn connected_frame(id: SubscriberId) -> Option<Utf8Bytes> {
    let envelope = Envelope::new(
        MSG_TYPE_CONNECTED,
        serde_json::json!({
            "client_id": id,
            "message": "Connected to hostwatch live updates",
        }),
    );
    match envelope.to_json() {
        Ok(text) => Some(text.into()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize connected envelope");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_nine_tenths_of_pong_wait() {
        let config = HubConfig {
            pong_wait: Duration::from_secs(60),
            ..HubConfig::default()
        };
        assert_eq!(config.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn connected_frame_names_the_subscriber() {
        let id = Uuid::new_v4();
        let frame = connected_frame(id).unwrap();
        let json: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();

        assert_eq!(json["type"], "connected");
        assert_eq!(json["data"]["client_id"], id.to_string());
    }

    #[tokio::test]
    async fn publish_without_running_loop_fills_then_drops() {
        let (hub, _hub_loop) = Hub::new(HubConfig {
            broadcast_capacity: 2,
            ..HubConfig::default()
        });

        assert!(hub.publish_text("a".into()));
        assert!(hub.publish_text("b".into()));
        assert!(!hub.publish_text("c".into()));

        let stats = hub.stats().await;
        assert_eq!(stats.broadcast_queue_depth, 2);
        assert_eq!(stats.broadcast_queue_capacity, 2);
        assert_eq!(stats.dropped_messages, 1);
    }
}
