//! Live-update fan-out over WebSocket.
//!
//! The [`Hub`] owns the subscriber registry; each upgraded connection runs
//! as a [`session`] with its own read and write pumps.

mod handler;
pub mod hub;
pub mod session;

pub use handler::ws_handler;
pub use hub::{Hub, HubConfig, HubStats, SubscriberId, Subscription};
