//! The alert evaluation engine.

mod alert_engine;

pub use alert_engine::{AlertEngine, AlertEngineConfig, EngineError, EngineStats};
