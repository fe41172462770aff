//! # streamer
//!
//! Gateway binary: loads settings, wires one relay to its backends, and
//! serves it over WebSocket until ctrl-c.

#![deny(unsafe_code)]

mod relays;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use streamer_server::config::ServerConfig;
use streamer_server::server::GatewayServer;
use streamer_server::shutdown::DrainOutcome;
use streamer_settings::StreamerSettings;

use crate::relays::{RelayKind, build_relay};

/// Streamer gateway.
#[derive(Parser, Debug)]
#[command(name = "streamer", about = "Persistent-connection gateway for streaming relays")]
struct Cli {
    /// Relay to serve.
    #[arg(long, value_enum)]
    relay: RelayKind,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides the relay's port variable and settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.streamer/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Server config with CLI and relay-specific overrides applied.
    ///
    /// Port precedence: `--port`, then the relay's port variable, then
    /// settings.
    fn server_config(&self, settings: &StreamerSettings, env_port: Option<u16>) -> ServerConfig {
        let mut config = ServerConfig::from_settings(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port.or(env_port) {
            config.port = port;
        }
        config
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<StreamerSettings> {
    match path {
        Some(path) => streamer_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(streamer_settings::load_settings().unwrap_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_ref())?;
    streamer_core::logging::init_subscriber(&settings.logging.level);

    let config = cli.server_config(&settings, cli.relay.env_port());
    let drain = config.lifecycle.drain_timeout + Duration::from_secs(5);
    let relay = build_relay(cli.relay, &settings)?;

    let relay_name = relay.name();
    let mut server = GatewayServer::new(config, relay);
    match streamer_server::metrics::install_recorder(relay_name) {
        Ok(handle) => server = server.with_metrics(handle),
        Err(error) => tracing::warn!(%error, "metrics recorder not installed"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(relay = ?cli.relay, "streamer listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    match server.shutdown().graceful_shutdown(vec![handle], Some(drain)).await {
        DrainOutcome::Completed => tracing::info!("Shutdown complete"),
        DrainOutcome::TimedOut { pending } => {
            tracing::warn!(pending, "Shutdown forced with tasks still running");
        }
    }
    Ok(())
}
