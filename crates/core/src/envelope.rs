//! Wire envelope for everything published through the broadcast hub.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Sent once to a newly registered subscriber.
pub const MSG_TYPE_CONNECTED: &str = "connected";

/// Periodic host metric snapshots.
pub const MSG_TYPE_METRICS: &str = "metrics";

/// Periodic hub and engine health summary.
pub const MSG_TYPE_SYSTEM_STATUS: &str = "system_status";

/// A rule fired.
pub const MSG_TYPE_ALERT_TRIGGERED: &str = "alert_triggered";

/// Inbound keepalive from a client.
pub const MSG_TYPE_PING: &str = "ping";

/// Reply to an inbound `ping`.
pub const MSG_TYPE_PONG: &str = "pong";

/// Inbound topic subscription request (acknowledged, not filtered).
pub const MSG_TYPE_SUBSCRIBE: &str = "subscribe";

/// Inbound topic unsubscription request (acknowledged, not filtered).
pub const MSG_TYPE_UNSUBSCRIBE: &str = "unsubscribe";

/// Uniform `{type, data, timestamp}` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: Timestamp,
}

impl Envelope {
    /// Wrap an already-built JSON value, stamped now.
    pub fn new(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize `payload` into the `data` field.
    pub fn from_payload<T: Serialize>(
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(message_type, serde_json::to_value(payload)?))
    }

    /// Compact JSON text for a single text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_type_field_name() {
        let env = Envelope::new(MSG_TYPE_METRICS, serde_json::json!({"cpu_percent": 1.0}));
        let json: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "metrics");
        assert_eq!(json["data"]["cpu_percent"], 1.0);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn inbound_message_without_data_or_timestamp_parses() {
        let env: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(env.message_type, MSG_TYPE_PING);
        assert!(env.data.is_null());
    }

    #[test]
    fn compact_json_has_no_newlines() {
        let env = Envelope::new(MSG_TYPE_ALERT_TRIGGERED, serde_json::json!({"message": "a\nb"}));
        assert!(!env.to_json().unwrap().contains('\n'));
    }
}
