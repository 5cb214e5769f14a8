//! hostwatch notification delivery.
//!
//! - [`NotificationSender`] - one outbound channel (email, webhook).
//! - [`delivery`] - the SMTP and HTTP implementations.
//! - [`NotificationDispatcher`] - bounded queue drained by a fixed pool of
//!   workers.

pub mod delivery;
pub mod dispatcher;
pub mod sender;

pub use delivery::email::{EmailConfig, EmailDelivery};
pub use delivery::webhook::WebhookDelivery;
pub use dispatcher::{DispatcherConfig, DispatcherStats, NotificationDispatcher, NotificationJob};
pub use sender::{NotificationChannel, NotificationSender, NotifyError};
