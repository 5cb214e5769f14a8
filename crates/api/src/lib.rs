//! hostwatch API server library.
//!
//! Exposes the building blocks (config, state, broadcast hub, alert engine,
//! background jobs, routes) so integration tests and the binary entrypoint
//! can both access them.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
