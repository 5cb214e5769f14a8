//! Webhook alert delivery.
//!
//! [`WebhookDelivery`] POSTs a JSON document describing the firing rule and
//! its history record to a fixed URL. One attempt per alert; failures are
//! returned to the dispatcher, which logs them.

use std::time::Duration;

use async_trait::async_trait;
use hostwatch_core::alert::AlertHistory;
use hostwatch_core::rule::Rule;

use crate::sender::{NotificationChannel, NotificationSender, NotifyError};

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers alert notifications to an external webhook endpoint.
pub struct WebhookDelivery {
    client: reqwest::Client,
    url: String,
}

impl WebhookDelivery {
    /// Create a delivery service targeting `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Read the target URL from `ALERT_WEBHOOK_URL`.
    ///
    /// Returns `Ok(None)` when the variable is unset or empty.
    pub fn from_env() -> Result<Option<Self>, WebhookError> {
        match std::env::var("ALERT_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()).map(Some),
            _ => Ok(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

/// JSON body posted for one alert.
pub fn webhook_payload(rule: &Rule, record: &AlertHistory) -> serde_json::Value {
    serde_json::json!({
        "event": "alert_triggered",
        "rule": {
            "id": rule.id,
            "name": rule.name,
            "metric": rule.metric,
            "operator": rule.operator,
            "threshold": rule.threshold,
            "severity": rule.severity,
        },
        "alert": record,
    })
}

#[async_trait]
impl NotificationSender for WebhookDelivery {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Webhook
    }

    async fn send(&self, rule: &Rule, record: &AlertHistory) -> Result<(), NotifyError> {
        self.try_send(&webhook_payload(rule, record)).await?;
        tracing::info!(
            url = %self.url,
            rule_id = rule.id,
            history_id = record.id,
            "Webhook notification sent"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
