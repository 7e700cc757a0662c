//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

use crate::websocket::hub::HubConfig;
use crate::websocket::session::SessionConfig;

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Whether a sender receives its own messages.
    pub echo_to_sender: bool,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a Pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Home-page template, read on every `GET /`.
    pub template_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            queue_capacity: 64,
            echo_to_sender: true,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 64 * 1024,
            template_path: PathBuf::from("templates/index.html"),
        }
    }
}

impl ServerConfig {
    /// `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to every WebSocket session, heartbeat clamped.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            queue_capacity: self.queue_capacity,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
        .clamped()
    }

    /// Settings for the hub actor.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            echo_to_sender: self.echo_to_sender,
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.hub.max_connections,
            queue_capacity: settings.hub.queue_capacity,
            echo_to_sender: settings.hub.echo_to_sender,
            heartbeat_interval_ms: settings.hub.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.hub.heartbeat_timeout_ms,
            max_message_size: settings.server.max_message_size,
            template_path: PathBuf::from(&settings.server.template_path),
        }
    }
}
