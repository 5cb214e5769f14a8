//! Alert events and their persisted history records.

use serde::{Deserialize, Serialize};

use crate::rule::{Operator, Rule, Severity};
use crate::types::{DbId, Timestamp};

/// A rule firing for one host.
///
/// Emitted by the alert engine and handed to the rule store, the hub and
/// the notification dispatcher. The engine does not retain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_id: DbId,
    pub rule_name: String,
    pub host: String,
    pub metric: String,
    /// The observed value that satisfied the condition.
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: Timestamp,
}

impl AlertEvent {
    /// Build the event for `rule` firing on `host` with `value`.
    pub fn new(
        rule: &Rule,
        operator: Operator,
        host: &str,
        value: f64,
        triggered_at: Timestamp,
    ) -> Self {
        Self {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            host: host.to_string(),
            metric: rule.metric.clone(),
            value,
            threshold: rule.threshold,
            severity: rule.severity,
            message: format_message(rule, operator, host, value),
            triggered_at,
        }
    }
}

/// Human-readable one-line description of a firing.
pub fn format_message(rule: &Rule, operator: Operator, host: &str, value: f64) -> String {
    format!(
        "{}: {} is {:.2} ({} {}) on {}",
        rule.name, rule.metric, value, operator, rule.threshold, host
    )
}

/// A persisted alert history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistory {
    pub id: DbId,
    pub rule_id: DbId,
    pub host: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
    pub triggered_at: Timestamp,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
}

impl AlertHistory {
    /// Build an unresolved record for `event` under the given id.
    pub fn from_event(id: DbId, event: &AlertEvent) -> Self {
        Self {
            id,
            rule_id: event.rule_id,
            host: event.host.clone(),
            value: event.value,
            threshold: event.threshold,
            severity: event.severity,
            message: event.message.clone(),
            triggered_at: event.triggered_at,
            resolved: false,
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn event_message_names_rule_metric_and_host() {
        let rule = Rule::new(7, "CPU high", "cpu", ">", 90.0).with_severity(Severity::Critical);
        let event = AlertEvent::new(&rule, Operator::GreaterThan, "web-1", 95.0, Utc::now());

        assert_eq!(event.message, "CPU high: cpu is 95.00 (> 90) on web-1");
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.rule_id, 7);
    }

    #[test]
    fn history_from_event_is_unresolved() {
        let rule = Rule::new(1, "load", "load_1", ">=", 4.0);
        let event = AlertEvent::new(&rule, Operator::GreaterOrEqual, "db-1", 5.0, Utc::now());
        let record = AlertHistory::from_event(11, &event);

        assert_eq!(record.id, 11);
        assert_eq!(record.host, "db-1");
        assert!(!record.resolved);
        assert!(record.resolved_at.is_none());
    }
}
