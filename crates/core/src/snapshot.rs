//! Point-in-time host metric bundle.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metric_names::{
    canonical_metric_name, METRIC_CPU_PERCENT, METRIC_DISK_PERCENT, METRIC_LOAD_1,
    METRIC_LOAD_15, METRIC_LOAD_5, METRIC_MEMORY_PERCENT,
};
use crate::types::Timestamp;

/// Immutable metric snapshot for one host, produced by the metric source at
/// a fixed cadence and consumed read-only by the alert engine and the hub.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Host identifier the gauges were sampled on.
    pub host: String,
    /// When the snapshot was sampled.
    pub timestamp: Timestamp,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub disk_percent: f64,
    #[serde(default)]
    pub load_1: f64,
    #[serde(default)]
    pub load_5: f64,
    #[serde(default)]
    pub load_15: f64,
}

impl Snapshot {
    /// Create a snapshot for `host` with every gauge at zero.
    pub fn new(host: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            host: host.into(),
            timestamp,
            ..Self::default()
        }
    }

    /// Set the CPU gauge.
    pub fn with_cpu(mut self, percent: f64) -> Self {
        self.cpu_percent = percent;
        self
    }

    /// Set the memory gauge.
    pub fn with_memory(mut self, percent: f64) -> Self {
        self.memory_percent = percent;
        self
    }

    /// Set the disk gauge.
    pub fn with_disk(mut self, percent: f64) -> Self {
        self.disk_percent = percent;
        self
    }

    /// Set all three load averages.
    pub fn with_load(mut self, load_1: f64, load_5: f64, load_15: f64) -> Self {
        self.load_1 = load_1;
        self.load_5 = load_5;
        self.load_15 = load_15;
        self
    }

    /// Look up a gauge by metric name or alias.
    ///
    /// Returns `None` when the name does not identify a known gauge.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let value = match canonical_metric_name(name)? {
            METRIC_CPU_PERCENT => self.cpu_percent,
            METRIC_MEMORY_PERCENT => self.memory_percent,
            METRIC_DISK_PERCENT => self.disk_percent,
            METRIC_LOAD_1 => self.load_1,
            METRIC_LOAD_5 => self.load_5,
            METRIC_LOAD_15 => self.load_15,
            _ => return None,
        };
        Some(value)
    }

    /// Reject snapshots that cannot be attributed to a host or carry a
    /// negative or non-finite gauge.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.host.trim().is_empty() {
            return Err(CoreError::Validation("host must not be empty".into()));
        }
        let gauges = [
            (METRIC_CPU_PERCENT, self.cpu_percent),
            (METRIC_MEMORY_PERCENT, self.memory_percent),
            (METRIC_DISK_PERCENT, self.disk_percent),
            (METRIC_LOAD_1, self.load_1),
            (METRIC_LOAD_5, self.load_5),
            (METRIC_LOAD_15, self.load_15),
        ];
        for (name, value) in gauges {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Validation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}
