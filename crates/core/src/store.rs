//! Rule and alert-history persistence, as seen by the alert engine.
//!
//! The storage backend itself lives outside this crate. Every method is
//! scoped to a single rule or record so that a failure only affects that
//! rule or record.

use async_trait::async_trait;

use crate::alert::{AlertEvent, AlertHistory};
use crate::rule::Rule;
use crate::types::{DbId, Timestamp};

/// Errors reported by a [`RuleStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules with `enabled == true`.
    async fn list_active_rules(&self) -> Result<Vec<Rule>, StoreError>;

    /// Persist a new unresolved history record for `event`.
    async fn create_history(&self, event: &AlertEvent) -> Result<AlertHistory, StoreError>;

    /// Unresolved history records belonging to `rule_id`, any host.
    async fn list_unresolved_history(&self, rule_id: DbId)
        -> Result<Vec<AlertHistory>, StoreError>;

    /// Mark a history record resolved.
    async fn resolve_history(&self, history_id: DbId) -> Result<(), StoreError>;

    /// Bump the rule's trigger counter and last-triggered time.
    async fn increment_trigger_stats(&self, rule_id: DbId) -> Result<(), StoreError>;

    /// Delete history records resolved before `resolved_before`.
    ///
    /// Returns the number of records removed. Backends that keep history
    /// indefinitely can rely on the default, which removes nothing.
    async fn purge_resolved_history(&self, _resolved_before: Timestamp) -> Result<usize, StoreError> {
        Ok(0)
    }
}
