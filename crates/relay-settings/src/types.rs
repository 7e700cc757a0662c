//! Settings types.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Shortest heartbeat interval the server accepts, in milliseconds.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and HTTP settings.
    pub server: ServerSettings,
    /// Hub fan-out and connection settings.
    pub hub: HubSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.queueCapacity must be at least 1".into(),
            ));
        }
        if self.hub.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.maxConnections must be at least 1".into(),
            ));
        }
        if self.hub.heartbeat_interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(SettingsError::InvalidValue(format!(
                "hub.heartbeatIntervalMs must be at least {MIN_HEARTBEAT_INTERVAL_MS}"
            )));
        }
        if self.hub.heartbeat_timeout_ms < self.hub.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "hub.heartbeatTimeoutMs must not be shorter than hub.heartbeatIntervalMs".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and HTTP settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Path of the home-page template, relative to the working directory.
    pub template_path: String,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            template_path: "templates/index.html".to_string(),
            max_message_size: 64 * 1024,
        }
    }
}

/// Hub fan-out and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Whether a sender receives its own messages.
    pub echo_to_sender: bool,
    /// Interval between server Ping frames in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a Pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_connections: 1024,
            echo_to_sender: true,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
