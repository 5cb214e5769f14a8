//! Threshold rule definitions and comparison operators.
//!
//! Rules are owned by the rule store; the alert engine only reads the
//! active subset. The operator is stored as free text so that a bad value
//! in one rule surfaces as a per-rule error at evaluation time instead of
//! failing the whole rule list.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metric_names::canonical_metric_name;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Comparison applied as `value <op> threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Operator {
    /// Parse a symbolic (`>=`) or mnemonic (`gte`) spelling.
    ///
    /// Case and surrounding whitespace are ignored.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let normalized = raw.trim().to_ascii_lowercase();
        let op = match normalized.as_str() {
            ">" | "gt" | "greater_than" => Operator::GreaterThan,
            ">=" | "gte" | "ge" | "greater_than_or_equal" => Operator::GreaterOrEqual,
            "<" | "lt" | "less_than" => Operator::LessThan,
            "<=" | "lte" | "le" | "less_than_or_equal" => Operator::LessOrEqual,
            "==" | "=" | "eq" | "equal" => Operator::Equal,
            "!=" | "<>" | "ne" | "neq" | "not_equal" => Operator::NotEqual,
            _ => return Err(CoreError::UnknownOperator(raw.to_string())),
        };
        Ok(op)
    }

    /// Evaluate `value <op> threshold`.
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::GreaterThan => value > threshold,
            Operator::GreaterOrEqual => value >= threshold,
            Operator::LessThan => value < threshold,
            Operator::LessOrEqual => value <= threshold,
            Operator::Equal => (value - threshold).abs() < f64::EPSILON,
            Operator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    /// Canonical symbolic spelling, used in alert messages.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity attached to every event a rule fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A stored threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: DbId,
    pub name: String,
    /// Metric name or alias (see [`crate::metric_names`]).
    pub metric: String,
    /// Operator spelling as stored; parsed on every evaluation.
    pub operator: String,
    pub threshold: f64,
    /// How long the condition must hold before firing. Zero fires immediately.
    #[serde(default)]
    pub duration_secs: u64,
    /// Minimum time between two firings for the same host.
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_webhook: bool,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Create an enabled rule with no duration, no cooldown and no
    /// notifications.
    pub fn new(
        id: DbId,
        name: impl Into<String>,
        metric: impl Into<String>,
        operator: impl Into<String>,
        threshold: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            metric: metric.into(),
            operator: operator.into(),
            threshold,
            duration_secs: 0,
            cooldown_secs: 0,
            severity: Severity::default(),
            enabled: true,
            notify_email: false,
            notify_webhook: false,
        }
    }

    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_notifications(mut self, email: bool, webhook: bool) -> Self {
        self.notify_email = email;
        self.notify_webhook = webhook;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Parse the stored operator spelling.
    pub fn parsed_operator(&self) -> Result<Operator, CoreError> {
        Operator::parse(&self.operator)
    }

    /// Check the operator and metric name.
    ///
    /// This is the only validation applied to rules; thresholds and
    /// timings are accepted as stored.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("rule name must not be empty".into()));
        }
        self.parsed_operator()?;
        if canonical_metric_name(&self.metric).is_none() {
            return Err(CoreError::UnknownMetric(self.metric.clone()));
        }
        Ok(())
    }
}
