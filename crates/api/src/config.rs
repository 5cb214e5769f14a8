use std::str::FromStr;
use std::time::Duration;

use hostwatch_events::DispatcherConfig;

use crate::engine::AlertEngineConfig;
use crate::ws::HubConfig;

/// A variable was set but could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{name} must be a valid {expected}, got '{value}'")]
pub struct ConfigError {
    pub name: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Snapshots accepted but not yet evaluated before `POST /metrics` sheds load.
    pub ingest_queue_capacity: usize,
    /// Period of the `system_status` broadcast.
    pub status_interval: Duration,
    /// Optional JSON file of rules to seed the in-memory rule store.
    pub rules_file: Option<String>,
    pub hub: HubConfig,
    pub engine: AlertEngineConfig,
    pub notifications: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 30,
            ingest_queue_capacity: 64,
            status_interval: Duration::from_secs(10),
            rules_file: None,
            hub: HubConfig::default(),
            engine: AlertEngineConfig::default(),
            notifications: DispatcherConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                 |
    /// |-----------------------------------|-------------------------|
    /// | `HOST`                            | `0.0.0.0`               |
    /// | `PORT`                            | `8080`                  |
    /// | `CORS_ORIGINS`                    | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`            | `30`                    |
    /// | `INGEST_QUEUE_CAPACITY`           | `64`                    |
    /// | `STATUS_INTERVAL_SECS`            | `10`                    |
    /// | `RULES_FILE`                      | unset                   |
    /// | `HUB_BROADCAST_CAPACITY`          | `256`                   |
    /// | `HUB_SEND_QUEUE_CAPACITY`         | `256`                   |
    /// | `WS_WRITE_WAIT_SECS`              | `10`                    |
    /// | `WS_PONG_WAIT_SECS`               | `60`                    |
    /// | `WS_MAX_MESSAGE_BYTES`            | `512`                   |
    /// | `ALERTS_ENABLED`                  | `true`                  |
    /// | `ALERT_SWEEP_INTERVAL_SECS`       | `30`                    |
    /// | `ALERT_STATE_RETENTION_HOURS`     | `24`                    |
    /// | `ALERT_IMMEDIATE_BYPASS_COOLDOWN` | `true`                  |
    /// | `NOTIFY_QUEUE_CAPACITY`           | `128`                   |
    /// | `NOTIFY_WORKERS`                  | `4`                     |
    ///
    /// Every duration, capacity and worker count must be non-zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ServerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let defaults = Self::default();

        let host = env.raw("HOST").unwrap_or(defaults.host);

        let cors_origins = match env.raw("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        let hub = HubConfig {
            broadcast_capacity: env.non_zero(
                "HUB_BROADCAST_CAPACITY",
                defaults.hub.broadcast_capacity,
            )?,
            send_queue_capacity: env.non_zero(
                "HUB_SEND_QUEUE_CAPACITY",
                defaults.hub.send_queue_capacity,
            )?,
            write_wait: env.secs("WS_WRITE_WAIT_SECS", defaults.hub.write_wait)?,
            pong_wait: env.secs("WS_PONG_WAIT_SECS", defaults.hub.pong_wait)?,
            max_message_bytes: env
                .non_zero("WS_MAX_MESSAGE_BYTES", defaults.hub.max_message_bytes)?,
        };

        let engine = AlertEngineConfig {
            enabled: env.parse("ALERTS_ENABLED", defaults.engine.enabled)?,
            sweep_interval: env.secs(
                "ALERT_SWEEP_INTERVAL_SECS",
                defaults.engine.sweep_interval,
            )?,
            state_retention: env.hours(
                "ALERT_STATE_RETENTION_HOURS",
                defaults.engine.state_retention,
            )?,
            immediate_bypasses_cooldown: env.parse(
                "ALERT_IMMEDIATE_BYPASS_COOLDOWN",
                defaults.engine.immediate_bypasses_cooldown,
            )?,
        };

        let notifications = DispatcherConfig {
            queue_capacity: env.non_zero(
                "NOTIFY_QUEUE_CAPACITY",
                defaults.notifications.queue_capacity,
            )?,
            workers: env.non_zero("NOTIFY_WORKERS", defaults.notifications.workers)?,
        };

        Ok(Self {
            host,
            port: env.parse("PORT", defaults.port)?,
            cors_origins,
            request_timeout_secs: env
                .non_zero("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            ingest_queue_capacity: env.non_zero(
                "INGEST_QUEUE_CAPACITY",
                defaults.ingest_queue_capacity,
            )?,
            status_interval: env.secs("STATUS_INTERVAL_SECS", defaults.status_interval)?,
            rules_file: env.raw("RULES_FILE").filter(|p| !p.trim().is_empty()),
            hub,
            engine,
            notifications,
        })
    }
}

/// Typed access to a variable source.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.raw(name) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError {
                name,
                expected: std::any::type_name::<T>(),
                value: raw,
            }),
            None => Ok(default),
        }
    }

    fn non_zero<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq + ToString,
    {
        let value = self.parse(name, default)?;
        if value == T::default() {
            return Err(ConfigError {
                name,
                expected: "non-zero value",
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    fn secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.non_zero(name, default.as_secs()).map(Duration::from_secs)
    }

    fn hours(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let hours: u64 = self.non_zero(name, default.as_secs() / 3600)?;
        hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError {
                name,
                expected: "number of hours",
                value: hours.to_string(),
            })
    }
}
