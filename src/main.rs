//! WebSocket throttling reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────┐
//!                      │                      PROXY                        │
//!                      │                                                   │
//!   Client Request     │  ┌─────────┐    ┌────────────────┐    plain HTTP  │
//!   ───────────────────┼─▶│  http   │───▶│ ws_rate_limit  │───────────────┼──▶ Upstream
//!                      │  │ server  │    │  middleware    │                │
//!                      │  └─────────┘    └───────┬────────┘                │
//!                      │                         │ WebSocket               │
//!                      │                         ▼                         │
//!                      │                 ┌───────────────┐                 │
//!   Client bytes       │                 │ DuplexLimiter │   raw bytes     │
//!   ◀─────────────────▶┼─────────────────│ (token bucket │◀───────────────┼──▶ Upstream
//!                      │                 │  per side)    │                 │
//!                      │                 └───────────────┘                 │
//!                      │                                                   │
//!                      │   config · observability · lifecycle              │
//!                      └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use ws_throttle_proxy::config::{load_config, ProxyConfig};
use ws_throttle_proxy::lifecycle::{trigger_on_signal, Shutdown};
use ws_throttle_proxy::observability::{init_logging, init_metrics};
use ws_throttle_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "ws-throttle-proxy", version, about = "Reverse proxy with per-connection WebSocket bandwidth limits")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability);

    tracing::info!("ws-throttle-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    trigger_on_signal(shutdown.clone());

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, shutdown);
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
