use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tracing::Level;

use beacon_bridge::ServerConfig;
use beacon_core::Transport;
use beacon_telemetry::{init_telemetry, TelemetryConfig};
use beacon_transport::{PhoenixTransport, TransportConfig};

/// Bridge GraphQL subscriptions on a Phoenix socket to UI message ports.
#[derive(Debug, Parser)]
#[command(name = "beacon", version)]
struct Args {
    /// Base URL of the GraphQL socket; `/socket` is appended.
    #[arg(long, env = "BEACON_SOCKET_ENDPOINT", default_value = "ws://localhost:4000")]
    socket_endpoint: String,

    /// Backend API endpoint handed to the UI as a page flag.
    #[arg(long, env = "BEACON_BACKEND_ENDPOINT", default_value = "http://localhost:4000")]
    backend_endpoint: String,

    /// Auth token for the socket and the UI.
    #[arg(long, env = "BEACON_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Port the UI connects to.
    #[arg(long, env = "BEACON_PORT", default_value_t = 9092)]
    port: u16,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Human-readable logs instead of JSON lines.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        json: !args.pretty,
        ..Default::default()
    });

    tracing::info!(
        socket_endpoint = %args.socket_endpoint,
        backend_endpoint = %args.backend_endpoint,
        authenticated = args.auth_token.is_some(),
        "Starting beacon"
    );

    let transport = Arc::new(PhoenixTransport::connect(TransportConfig {
        socket_endpoint: args.socket_endpoint,
        auth_token: args.auth_token.clone().map(SecretString::from),
        ..Default::default()
    }));

    let config = ServerConfig {
        port: args.port,
        backend_endpoint: args.backend_endpoint,
        auth_token: args.auth_token.map(SecretString::from),
        ..Default::default()
    };
    let handle = beacon_bridge::start_with_telemetry(config, transport.clone(), &telemetry)
        .await
        .context("failed to start UI server")?;

    tracing::info!(port = handle.port, "Beacon ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    transport.shutdown();
    tracing::info!(reconnects = transport.reconnect_count(), "Transport closed");

    Ok(())
}
