//! Bounded notification queue drained by a fixed worker pool.
//!
//! [`NotificationDispatcher::dispatch`] never waits: when the queue is full
//! the job is dropped and logged. Workers run until every clone of the
//! dispatcher has been dropped and the queue is drained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hostwatch_core::alert::AlertHistory;
use hostwatch_core::rule::Rule;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::sender::NotificationSender;

/// Default queue bound.
const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default number of concurrent delivery workers.
const DEFAULT_WORKERS: usize = 4;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Jobs waiting for a worker before new ones are dropped.
    pub queue_capacity: usize,
    /// Concurrent delivery workers.
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
        }
    }
}

// ---------------------------------------------------------------------------
// Job + stats
// ---------------------------------------------------------------------------

/// One fired alert awaiting delivery.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub rule: Rule,
    pub record: AlertHistory,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
    pub queue_depth: usize,
}

// ---------------------------------------------------------------------------
// NotificationDispatcher
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to the notification queue.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<NotificationJob>,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Spawn `config.workers` delivery workers over `senders`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(senders: Vec<Arc<dyn NotificationSender>>, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let senders: Arc<[Arc<dyn NotificationSender>]> = senders.into();
        let counters = Arc::new(Counters::default());

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            channels = senders.len(),
            "Notification dispatcher started"
        );

        for worker in 0..config.workers {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&rx),
                Arc::clone(&senders),
                Arc::clone(&counters),
            ));
        }

        Self { tx, counters }
    }

    /// Queue a job without waiting.
    ///
    /// Returns `false` if the job was dropped because the queue is full or
    /// the workers have stopped.
    pub fn dispatch(&self, job: NotificationJob) -> bool {
        let rule_id = job.rule.id;
        match self.tx.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    rule_id,
                    history_id = job.record.id,
                    "Notification queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(rule_id, "Notification workers stopped, dropping notification");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queue_depth: self.tx.max_capacity() - self.tx.capacity(),
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    senders: Arc<[Arc<dyn NotificationSender>]>,
    counters: Arc<Counters>,
) {
    loop {
        // Hold the receiver lock only while waiting for the next job.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker, "Notification queue closed, worker exiting");
            break;
        };

        for sender in senders.iter() {
            let channel = sender.channel();
            if !channel.enabled_for(&job.rule) {
                continue;
            }
            match sender.send(&job.rule, &job.record).await {
                Ok(()) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        worker,
                        %channel,
                        rule_id = job.rule.id,
                        history_id = job.record.id,
                        error = %e,
                        "Failed to send alert notification"
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
