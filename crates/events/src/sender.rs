//! The notification sender seam.

use std::fmt;

use async_trait::async_trait;
use hostwatch_core::alert::AlertHistory;
use hostwatch_core::rule::Rule;

use crate::delivery::email::EmailError;
use crate::delivery::webhook::WebhookError;

/// Which rule toggle gates a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Email,
    Webhook,
}

impl NotificationChannel {
    /// Whether `rule` asks for notifications on this channel.
    pub fn enabled_for(self, rule: &Rule) -> bool {
        match self {
            NotificationChannel::Email => rule.notify_email,
            NotificationChannel::Webhook => rule.notify_webhook,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Webhook => "webhook",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from any sender.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("Notification failed: {0}")]
    Other(String),
}

/// Delivers one alert history record for a rule over one channel.
///
/// Implementations make a single attempt; the dispatcher logs failures and
/// does not retry.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    async fn send(&self, rule: &Rule, record: &AlertHistory) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_follows_rule_toggles() {
        let rule = Rule::new(1, "cpu", "cpu", ">", 90.0).with_notifications(true, false);
        assert!(NotificationChannel::Email.enabled_for(&rule));
        assert!(!NotificationChannel::Webhook.enabled_for(&rule));
    }

    #[test]
    fn notify_error_display_other() {
        let err = NotifyError::Other("boom".into());
        assert_eq!(err.to_string(), "Notification failed: boom");
    }
}
