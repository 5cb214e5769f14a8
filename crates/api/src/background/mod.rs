//! Long-running background jobs spawned from `main`.
//!
//! Each job runs until its [`CancellationToken`](tokio_util::sync::CancellationToken)
//! is cancelled.

pub mod ingest;
pub mod system_status;
