//! Threshold rule evaluation with sustained-duration and cooldown tracking.
//!
//! [`AlertEngine::evaluate`] is called once per ingested snapshot. It reads
//! the active rules fresh from the [`RuleStore`], compares each rule's metric
//! and feeds the outcome to the per-(rule, host) [`AlertStateTracker`].
//!
//! The engine lock covers only that in-memory bookkeeping. Persistence,
//! auto-resolution and notification run on detached tasks so a slow store
//! or mail server never holds up ingestion.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use hostwatch_core::alert::AlertEvent;
use hostwatch_core::alert_state::{AlertKey, AlertStateTracker, Decision, RuleTiming};
use hostwatch_core::envelope::{Envelope, MSG_TYPE_ALERT_TRIGGERED};
use hostwatch_core::rule::{Operator, Rule};
use hostwatch_core::snapshot::Snapshot;
use hostwatch_core::store::RuleStore;
use hostwatch_core::types::{DbId, Timestamp};
use hostwatch_events::{NotificationDispatcher, NotificationJob};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ws::Hub;

/// Default period of the stale-state sweep.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default retention for per-key state that has not been touched.
const DEFAULT_STATE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Config / errors / stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEngineConfig {
    /// A disabled engine evaluates nothing and ignores start/stop.
    pub enabled: bool,
    pub sweep_interval: Duration,
    pub state_retention: Duration,
    /// Zero-duration rules fire on every matching cycle, ignoring cooldown.
    pub immediate_bypasses_cooldown: bool,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            state_retention: DEFAULT_STATE_RETENTION,
            immediate_bypasses_cooldown: true,
        }
    }
}

/// Invalid lifecycle transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Alert engine is already running")]
    AlreadyRunning,

    #[error("Alert engine is not running")]
    NotRunning,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub enabled: bool,
    pub running: bool,
    /// Snapshots evaluated since start-up.
    pub evaluations: u64,
    /// Alert events emitted since start-up.
    pub triggered: u64,
    /// Keys currently held in memory.
    pub tracked_keys: usize,
    /// Keys whose condition is currently held.
    pub pending_keys: usize,
    /// Keys carrying a last-fired time (cooldown candidates).
    pub fired_keys: usize,
}

// ---------------------------------------------------------------------------
// AlertEngine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EngineState {
    tracker: AlertStateTracker,
    evaluations: u64,
    triggered: u64,
}

struct Housekeeping {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One rule that produced a comparison result this cycle.
struct Check {
    rule: Rule,
    operator: Operator,
    value: f64,
    condition_met: bool,
}

pub struct AlertEngine {
    config: AlertEngineConfig,
    store: Arc<dyn RuleStore>,
    hub: Option<Arc<Hub>>,
    notifier: Option<NotificationDispatcher>,
    state: Mutex<EngineState>,
    housekeeping: Mutex<Option<Housekeeping>>,
}

impl AlertEngine {
    pub fn new(config: AlertEngineConfig, store: Arc<dyn RuleStore>) -> Self {
        Self {
            config,
            store,
            hub: None,
            notifier: None,
            state: Mutex::new(EngineState::default()),
            housekeeping: Mutex::new(None),
        }
    }

    /// Publish an `alert_triggered` envelope to `hub` for every firing.
    pub fn with_hub(mut self, hub: Arc<Hub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Queue notifications for rules that ask for them.
    pub fn with_notifier(mut self, notifier: NotificationDispatcher) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &AlertEngineConfig {
        &self.config
    }

    /// Start the periodic stale-state sweep.
    ///
    /// A disabled engine returns `Ok(())` without starting anything.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if !self.config.enabled {
            tracing::info!("Alert engine disabled, not starting");
            return Ok(());
        }

        let mut housekeeping = self.housekeeping.lock().await;
        if housekeeping.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_housekeeping(
            Arc::downgrade(self),
            self.config.sweep_interval,
            cancel.clone(),
        ));
        *housekeeping = Some(Housekeeping { cancel, handle });

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            retention_secs = self.config.state_retention.as_secs(),
            immediate_bypasses_cooldown = self.config.immediate_bypasses_cooldown,
            "Alert engine started"
        );
        Ok(())
    }

    /// Stop the sweep and wait for it to exit.
    ///
    /// In-flight evaluations are not interrupted.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if !self.config.enabled {
            return Ok(());
        }

        let Some(housekeeping) = self.housekeeping.lock().await.take() else {
            return Err(EngineError::NotRunning);
        };
        housekeeping.cancel.cancel();
        if let Err(e) = housekeeping.handle.await {
            tracing::error!(error = %e, "Alert engine sweep task failed");
        }

        tracing::info!("Alert engine stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.housekeeping.lock().await.is_some()
    }

    /// Evaluate every active rule against `snapshot` at the current time.
    pub async fn evaluate(&self, snapshot: &Snapshot) -> Vec<AlertEvent> {
        self.evaluate_at(snapshot, Utc::now()).await
    }

    /// Evaluate every active rule against `snapshot` as of `now`.
    ///
    /// Returns the events fired this cycle. Store failures, unknown metrics
    /// and unparsable operators are logged and skip only the affected rule.
    pub async fn evaluate_at(&self, snapshot: &Snapshot, now: Timestamp) -> Vec<AlertEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let rules = match self.store.list_active_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(host = %snapshot.host, error = %e, "Failed to load alert rules");
                return Vec::new();
            }
        };

        let checks: Vec<Check> = rules
            .into_iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| check_rule(rule, snapshot))
            .collect();

        let mut fired = Vec::new();
        let mut cleared = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.evaluations += 1;
            for check in checks {
                let key = AlertKey::new(check.rule.id, snapshot.host.as_str());
                let timing =
                    RuleTiming::for_rule(&check.rule, self.config.immediate_bypasses_cooldown);
                match state.tracker.observe(&key, check.condition_met, timing, now) {
                    Decision::Fire => {
                        state.triggered += 1;
                        fired.push(check);
                    }
                    Decision::Idle => cleared.push(check.rule.id),
                    Decision::Pending => {
                        tracing::trace!(rule_id = check.rule.id, host = %snapshot.host, "Alert pending");
                    }
                    Decision::CooldownBlocked => {
                        tracing::debug!(rule_id = check.rule.id, host = %snapshot.host, "Alert suppressed by cooldown");
                    }
                }
            }
        }

        for rule_id in cleared {
            self.spawn_auto_resolve(rule_id, snapshot.host.clone());
        }

        let mut events = Vec::with_capacity(fired.len());
        for check in fired {
            let event = AlertEvent::new(&check.rule, check.operator, &snapshot.host, check.value, now);
            tracing::info!(
                rule_id = event.rule_id,
                host = %event.host,
                value = event.value,
                threshold = event.threshold,
                severity = event.severity.as_str(),
                "Alert triggered"
            );
            self.publish(&event);
            self.spawn_record(check.rule, event.clone());
            events.push(event);
        }
        events
    }

    /// Drop per-key state untouched for longer than the retention window.
    pub async fn sweep_at(&self, now: Timestamp) -> usize {
        let purged = self
            .state
            .lock()
            .await
            .tracker
            .purge_stale(now, self.config.state_retention);
        if purged > 0 {
            tracing::info!(purged, "Alert engine: purged stale alert state");
        } else {
            tracing::debug!("Alert engine: no stale alert state");
        }

        let cutoff = chrono::Duration::from_std(self.config.state_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            match self.store.purge_resolved_history(cutoff).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, "Alert engine: purged resolved alert history")
                }
                Err(e) => tracing::warn!(error = %e, "Alert engine: failed to purge alert history"),
            }
        }
        purged
    }

    pub async fn stats(&self) -> EngineStats {
        let running = self.is_running().await;
        let state = self.state.lock().await;
        let counts = state.tracker.counts();
        EngineStats {
            enabled: self.config.enabled,
            running,
            evaluations: state.evaluations,
            triggered: state.triggered,
            tracked_keys: counts.tracked,
            pending_keys: counts.pending,
            fired_keys: counts.triggered,
        }
    }

    fn publish(&self, event: &AlertEvent) {
        let Some(hub) = &self.hub else {
            return;
        };
        match Envelope::from_payload(MSG_TYPE_ALERT_TRIGGERED, event) {
            Ok(envelope) => {
                hub.publish(&envelope);
            }
            Err(e) => {
                tracing::error!(rule_id = event.rule_id, error = %e, "Failed to encode alert event");
            }
        }
    }

    /// Persist the firing, bump the rule's counters, then queue notifications.
    fn spawn_record(&self, rule: Rule, event: AlertEvent) {
        let store = Arc::clone(&self.store);
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let record = match store.create_history(&event).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(
                        rule_id = rule.id,
                        host = %event.host,
                        error = %e,
                        "Failed to record alert history"
                    );
                    return;
                }
            };

            if let Err(e) = store.increment_trigger_stats(rule.id).await {
                tracing::error!(rule_id = rule.id, error = %e, "Failed to update rule trigger stats");
            }

            if let Some(notifier) = notifier {
                if rule.notify_email || rule.notify_webhook {
                    notifier.dispatch(NotificationJob { rule, record });
                }
            }
        });
    }

    /// Resolve every open history record of `rule_id` for `host`.
    fn spawn_auto_resolve(&self, rule_id: DbId, host: String) {
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let open = match store.list_unresolved_history(rule_id).await {
                Ok(open) => open,
                Err(e) => {
                    tracing::error!(rule_id, host = %host, error = %e, "Failed to list open alerts");
                    return;
                }
            };

            for record in open.into_iter().filter(|r| r.host == host) {
                match store.resolve_history(record.id).await {
                    Ok(()) => {
                        tracing::info!(rule_id, host = %host, history_id = record.id, "Alert auto-resolved");
                    }
                    Err(e) => {
                        tracing::error!(
                            rule_id,
                            history_id = record.id,
                            error = %e,
                            "Failed to resolve alert"
                        );
                    }
                }
            }
        });
    }
}

/// Resolve the rule's metric and operator, or log why it is skipped.
fn check_rule(rule: Rule, snapshot: &Snapshot) -> Option<Check> {
    let Some(value) = snapshot.metric(&rule.metric) else {
        tracing::warn!(
            rule_id = rule.id,
            metric = %rule.metric,
            "Unknown metric in alert rule, skipping"
        );
        return None;
    };

    let operator = match rule.parsed_operator() {
        Ok(operator) => operator,
        Err(e) => {
            tracing::warn!(rule_id = rule.id, error = %e, "Invalid operator in alert rule, skipping");
            return None;
        }
    };

    let condition_met = operator.compare(value, rule.threshold);
    Some(Check {
        rule,
        operator,
        value,
        condition_met,
    })
}

async fn run_housekeeping(engine: Weak<AlertEngine>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Alert engine sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.sweep_at(Utc::now()).await;
            }
        }
    }
}
