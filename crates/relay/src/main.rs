//! # relay
//!
//! Relay server binary — loads settings, wires logging and metrics, and
//! serves the broadcast hub until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging;
use relay_server::config::ServerConfig;
use relay_server::server::RelayServer;
use relay_settings::{LogFormat, RelaySettings};

/// Real-time WebSocket broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Real-time WebSocket broadcast hub")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `debug` or `relay_server=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Layer the command-line flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<RelaySettings> {
    let mut settings = match cli.settings {
        Some(ref path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().with_context(|| {
            format!(
                "Failed to load settings from {}",
                relay_settings::settings_path().display()
            )
        })?,
    };
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match settings.logging.format {
        LogFormat::Compact => logging::init_subscriber(&settings.logging.level),
        LogFormat::Json => logging::init_json_subscriber(&settings.logging.level),
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(&settings);
    tracing::info!(
        max_connections = config.max_connections,
        queue_capacity = config.queue_capacity,
        echo_to_sender = config.echo_to_sender,
        "starting relay"
    );
    let server = RelayServer::new(config).with_metrics(metrics);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!("relay listening on http://{addr} (ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let outcome = server.shutdown().drain(handle, None).await;

    tracing::info!(?outcome, "Shutdown complete");
    Ok(())
}
