//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every struct carries
//! `#[serde(default)]`, so a settings file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TideSettings {
    /// HTTP listener and shutdown.
    pub server: ServerSettings,
    /// SQLite state store.
    pub store: StoreSettings,
    /// In-process pub/sub relay.
    pub relay: RelaySettings,
    /// Session cookie and eviction.
    pub session: SessionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TideSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "store.poolSize must be at least 1".into(),
            ));
        }
        if self.relay.subscriber_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.subscriberBuffer must be at least 1".into(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "session.cookieName must not be empty".into(),
            ));
        }
        if self.store.db_path.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "store.dbPath must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// How long shutdown waits for open streams to close.
    pub shutdown_grace_ms: u64,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_grace_ms: 5_000,
            keep_alive_secs: 15,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// SQLite state store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file path. Parent directories are created on open.
    pub db_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `PRAGMA busy_timeout` in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "./data/todos.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Pub/sub relay settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Bounded inbound buffer per subscriber. A full buffer drops events for
    /// that subscriber only.
    pub subscriber_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
        }
    }
}

/// Session cookie and idle eviction settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Name of the cookie carrying the session id.
    pub cookie_name: String,
    /// Cookie `Max-Age` in seconds.
    pub cookie_max_age_secs: u64,
    /// Whether the cookie is marked `Secure`.
    pub secure_cookie: bool,
    /// Sessions not saved for this long are purged. `0` disables eviction.
    pub idle_ttl_secs: u64,
    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "connections".to_string(),
            cookie_max_age_secs: 30 * 24 * 60 * 60,
            secure_cookie: false,
            idle_ttl_secs: 30 * 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl SessionSettings {
    /// Idle TTL, or `None` when eviction is disabled.
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    /// Sweep interval, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
