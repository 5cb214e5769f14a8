//! In-process [`RuleStore`] backed by maps behind a `RwLock`.
//!
//! Rules can be seeded from a JSON file (`RULES_FILE`) at start-up. History
//! and trigger counters live only as long as the process. Resolved history
//! is dropped by [`RuleStore::purge_resolved_history`], which the alert
//! engine's sweep calls with its retention cut-off.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use hostwatch_core::alert::{AlertEvent, AlertHistory};
use hostwatch_core::error::CoreError;
use hostwatch_core::rule::Rule;
use hostwatch_core::store::{RuleStore, StoreError};
use hostwatch_core::types::{DbId, Timestamp};
use serde::Serialize;
use tokio::sync::RwLock;

/// Failure loading the seed rules file.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read rules file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rules file is not a JSON array of rules: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid rule {id}: {source}")]
    InvalidRule { id: DbId, source: CoreError },
}

/// Per-rule trigger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    pub trigger_count: u64,
    pub last_triggered_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: BTreeMap<DbId, Rule>,
    /// Keyed by id, so iteration is oldest first.
    history: BTreeMap<DbId, AlertHistory>,
    /// Unresolved history ids per rule.
    open_history: HashMap<DbId, BTreeSet<DbId>>,
    next_history_id: DbId,
    trigger_stats: HashMap<DbId, TriggerStats>,
}

#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    inner: RwLock<Inner>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `rules`, rejecting any that fail validation.
    pub fn with_rules(rules: Vec<Rule>) -> Result<Self, SeedError> {
        let mut map = BTreeMap::new();
        for rule in rules {
            rule.validate().map_err(|source| SeedError::InvalidRule {
                id: rule.id,
                source,
            })?;
            map.insert(rule.id, rule);
        }
        Ok(Self {
            inner: RwLock::new(Inner {
                rules: map,
                ..Inner::default()
            }),
        })
    }

    /// Load a JSON array of rules from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        let rules: Vec<Rule> = serde_json::from_str(&raw)?;
        Self::with_rules(rules)
    }

    /// Insert or replace a rule without validation.
    ///
    /// The engine re-checks operator and metric every cycle, so a bad rule
    /// here is skipped rather than fatal.
    pub async fn upsert_rule(&self, rule: Rule) {
        self.inner.write().await.rules.insert(rule.id, rule);
    }

    pub async fn remove_rule(&self, id: DbId) -> Option<Rule> {
        self.inner.write().await.rules.remove(&id)
    }

    pub async fn rule_count(&self) -> usize {
        self.inner.read().await.rules.len()
    }

    /// All history records, oldest first.
    pub async fn history(&self) -> Vec<AlertHistory> {
        self.inner.read().await.history.values().cloned().collect()
    }

    pub async fn trigger_stats(&self, rule_id: DbId) -> TriggerStats {
        self.inner
            .read()
            .await
            .trigger_stats
            .get(&rule_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_active_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .rules
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn create_history(&self, event: &AlertEvent) -> Result<AlertHistory, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_history_id += 1;
        let id = inner.next_history_id;
        let record = AlertHistory::from_event(id, event);
        inner.history.insert(id, record.clone());
        inner.open_history.entry(record.rule_id).or_default().insert(id);
        Ok(record)
    }

    async fn list_unresolved_history(
        &self,
        rule_id: DbId,
    ) -> Result<Vec<AlertHistory>, StoreError> {
        let inner = self.inner.read().await;
        let Some(open) = inner.open_history.get(&rule_id) else {
            return Ok(Vec::new());
        };
        Ok(open
            .iter()
            .filter_map(|id| inner.history.get(id))
            .cloned()
            .collect())
    }

    async fn resolve_history(&self, history_id: DbId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .history
            .get_mut(&history_id)
            .ok_or(StoreError::NotFound {
                entity: "AlertHistory",
                id: history_id,
            })?;
        if record.resolved {
            return Ok(());
        }
        record.resolved = true;
        record.resolved_at = Some(Utc::now());
        let rule_id = record.rule_id;

        if let Some(open) = inner.open_history.get_mut(&rule_id) {
            open.remove(&history_id);
            if open.is_empty() {
                inner.open_history.remove(&rule_id);
            }
        }
        Ok(())
    }

    async fn purge_resolved_history(&self, resolved_before: Timestamp) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.history.len();
        inner
            .history
            .retain(|_, h| !h.resolved_at.is_some_and(|at| at < resolved_before));
        Ok(before - inner.history.len())
    }

    async fn increment_trigger_stats(&self, rule_id: DbId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.rules.contains_key(&rule_id) {
            return Err(StoreError::NotFound {
                entity: "Rule",
                id: rule_id,
            });
        }
        let stats = inner.trigger_stats.entry(rule_id).or_default();
        stats.trigger_count += 1;
        stats.last_triggered_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use hostwatch_core::rule::Operator;

    use super::*;

    fn event(rule: &Rule, host: &str) -> AlertEvent {
        AlertEvent::new(rule, Operator::GreaterThan, host, 99.0, Utc::now())
    }

    #[tokio::test]
    async fn list_active_rules_skips_disabled() {
        let mut disabled = Rule::new(2, "mem", "memory", ">", 80.0);
        disabled.enabled = false;
        let store =
            MemoryRuleStore::with_rules(vec![Rule::new(1, "cpu", "cpu", ">", 90.0), disabled])
                .unwrap();

        let active = store.list_active_rules().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
    }

    #[test]
    fn with_rules_rejects_unknown_metric() {
        let result = MemoryRuleStore::with_rules(vec![Rule::new(7, "x", "swap", ">", 1.0)]);
        assert_matches!(
            result,
            Err(SeedError::InvalidRule {
                id: 7,
                source: CoreError::UnknownMetric(_)
            })
        );
    }

    #[tokio::test]
    async fn history_resolves_once() {
        let rule = Rule::new(1, "cpu", "cpu", ">", 90.0);
        let store = MemoryRuleStore::with_rules(vec![rule.clone()]).unwrap();

        let a = store.create_history(&event(&rule, "web-1")).await.unwrap();
        let b = store.create_history(&event(&rule, "web-2")).await.unwrap();
        assert_ne!(a.id, b.id);

        store.resolve_history(a.id).await.unwrap();
        let open = store.list_unresolved_history(1).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].host, "web-2");

        let history = store.history().await;
        assert!(history[0].resolved);
        assert!(history[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn resolve_unknown_history_is_not_found() {
        let store = MemoryRuleStore::new();
        assert_matches!(
            store.resolve_history(404).await,
            Err(StoreError::NotFound { id: 404, .. })
        );
    }

    #[tokio::test]
    async fn trigger_stats_accumulate() {
        let store =
            MemoryRuleStore::with_rules(vec![Rule::new(3, "load", "load5", ">=", 4.0)]).unwrap();
        store.increment_trigger_stats(3).await.unwrap();
        store.increment_trigger_stats(3).await.unwrap();

        let stats = store.trigger_stats(3).await;
        assert_eq!(stats.trigger_count, 2);
        assert!(stats.last_triggered_at.is_some());
    }

    #[tokio::test]
    async fn purge_drops_only_old_resolved_history() {
        let rule = Rule::new(1, "cpu", "cpu", ">", 90.0);
        let store = MemoryRuleStore::with_rules(vec![rule.clone()]).unwrap();

        let resolved = store.create_history(&event(&rule, "web-1")).await.unwrap();
        store.create_history(&event(&rule, "web-2")).await.unwrap();
        store.resolve_history(resolved.id).await.unwrap();

        let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.purge_resolved_history(an_hour_ago).await.unwrap(), 0);
        assert_eq!(store.history().await.len(), 2);

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.purge_resolved_history(later).await.unwrap(), 1);

        let remaining = store.history().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].host, "web-2");
        assert_eq!(store.list_unresolved_history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolving_clears_open_index() {
        let rule = Rule::new(1, "cpu", "cpu", ">", 90.0);
        let store = MemoryRuleStore::with_rules(vec![rule.clone()]).unwrap();

        let record = store.create_history(&event(&rule, "web-1")).await.unwrap();
        store.resolve_history(record.id).await.unwrap();
        store.resolve_history(record.id).await.unwrap();

        assert!(store.list_unresolved_history(1).await.unwrap().is_empty());
        assert!(store.inner.read().await.open_history.is_empty());
    }
}
