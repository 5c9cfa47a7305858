//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields; missing fields keep their
//! production defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8080 },
///   "relay": { "pingIntervalSecs": 25 },
///   "store": { "historyLimit": 50 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LatchSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Change-notification relay.
    pub relay: RelaySettings,
    /// Card and scan-history store.
    pub store: StoreSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl LatchSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host must not be empty".into()));
        }
        if self.relay.topic.trim().is_empty() {
            return Err(SettingsError::InvalidValue("relay.topic must not be empty".into()));
        }
        if self.relay.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.pingIntervalSecs must be greater than 0".into(),
            ));
        }
        if let Some(timeout) = self.relay.pong_timeout_secs {
            if timeout < self.relay.ping_interval_secs {
                return Err(SettingsError::InvalidValue(
                    "relay.pongTimeoutSecs must be at least relay.pingIntervalSecs".into(),
                ));
            }
        }
        if self.relay.outbound_queue == 0 || self.relay.bus_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.outboundQueue and relay.busCapacity must be greater than 0".into(),
            ));
        }
        if self.store.history_limit == 0 {
            return Err(SettingsError::InvalidValue(
                "store.historyLimit must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Network listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 64 * 1024,
        }
    }
}

/// Relay behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Bus channel carrying every change event.
    pub topic: String,
    /// Seconds between keep-alive pings. Kept under the 55 s idle timeout of
    /// common hosting proxies.
    pub ping_interval_secs: u64,
    /// Close connections that have not answered a ping for this long.
    /// `None` disables the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
    /// Per-connection outbound queue length; events beyond it are dropped.
    pub outbound_queue: usize,
    /// Per-topic bus buffer.
    pub bus_capacity: usize,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl RelaySettings {
    /// Keep-alive period.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Liveness timeout, when enabled.
    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_secs.map(Duration::from_secs)
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            topic: "db-change".to_string(),
            ping_interval_secs: 25,
            pong_timeout_secs: None,
            outbound_queue: 256,
            bus_capacity: 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Record store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// `SQLite` database file. `None` keeps everything in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Number of scan-history entries retained.
    pub history_limit: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            history_limit: 50,
        }
    }
}

/// Logging output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `[["latch_server", "debug"]]`.
    pub modules: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: Vec::new(),
        }
    }
}
