//! Well-known host metric names.
//!
//! These are the canonical names a rule's `metric` field may reference and
//! the field names of a serialized [`Snapshot`](crate::snapshot::Snapshot).
//! Rules may also use the short aliases accepted by
//! [`canonical_metric_name`].

/// CPU utilization percentage (0-100).
pub const METRIC_CPU_PERCENT: &str = "cpu_percent";

/// Memory utilization percentage (0-100).
pub const METRIC_MEMORY_PERCENT: &str = "memory_percent";

/// Root filesystem utilization percentage (0-100).
pub const METRIC_DISK_PERCENT: &str = "disk_percent";

/// One-minute load average.
pub const METRIC_LOAD_1: &str = "load_1";

/// Five-minute load average.
pub const METRIC_LOAD_5: &str = "load_5";

/// Fifteen-minute load average.
pub const METRIC_LOAD_15: &str = "load_15";

/// Every canonical metric name, in snapshot field order.
pub const KNOWN_METRICS: [&str; 6] = [
    METRIC_CPU_PERCENT,
    METRIC_MEMORY_PERCENT,
    METRIC_DISK_PERCENT,
    METRIC_LOAD_1,
    METRIC_LOAD_5,
    METRIC_LOAD_15,
];

/// Map a rule's metric name (canonical or alias) to its canonical form.
///
/// Matching ignores ASCII case and surrounding whitespace. Returns `None`
/// for names that do not identify a snapshot gauge.
pub fn canonical_metric_name(name: &str) -> Option<&'static str> {
    let normalized = name.trim().to_ascii_lowercase();
    let canonical = match normalized.as_str() {
        "cpu" | "cpu_usage" | "cpu_percent" => METRIC_CPU_PERCENT,
        "memory" | "mem" | "memory_usage" | "memory_percent" => METRIC_MEMORY_PERCENT,
        "disk" | "disk_usage" | "disk_percent" => METRIC_DISK_PERCENT,
        "load" | "load1" | "load_1" | "load_avg_1" => METRIC_LOAD_1,
        "load5" | "load_5" | "load_avg_5" => METRIC_LOAD_5,
        "load15" | "load_15" | "load_avg_15" => METRIC_LOAD_15,
        _ => return None,
    };
    Some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_names() {
        assert_eq!(canonical_metric_name("cpu"), Some(METRIC_CPU_PERCENT));
        assert_eq!(canonical_metric_name(" Memory "), Some(METRIC_MEMORY_PERCENT));
        assert_eq!(canonical_metric_name("LOAD15"), Some(METRIC_LOAD_15));
    }

    #[test]
    fn canonical_names_resolve_to_themselves() {
        for name in KNOWN_METRICS {
            assert_eq!(canonical_metric_name(name), Some(name));
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(canonical_metric_name("gpu_temperature"), None);
        assert_eq!(canonical_metric_name(""), None);
    }
}
