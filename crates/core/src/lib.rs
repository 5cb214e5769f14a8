//! Domain types and pure alerting logic for hostwatch.
//!
//! Nothing in this crate performs I/O. Collaborators that do (the rule
//! store, notification senders, the broadcast hub) are reached through the
//! narrow interfaces defined here and implemented elsewhere.

pub mod alert;
pub mod alert_state;
pub mod envelope;
pub mod error;
pub mod metric_names;
pub mod rule;
pub mod snapshot;
pub mod store;
pub mod types;
