//! inteli-proxy
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────────┐
//!                       │                    INTELI PROXY                    │
//!                       │                                                    │
//!   Agent (backend)     │  ┌──────────┐    ┌──────────┐    ┌─────────────┐  │
//!   ────────────────────┼─▶│ control  │───▶│ session  │───▶│   handler   │  │
//!   WebSocket + RSA     │  │ upgrade  │    │  loop    │    │  dispatch   │  │
//!                       │  └──────────┘    └──────────┘    └──────┬──────┘  │
//!                       │                                         │ add/remove
//!                       │                                         ▼         │
//!                       │                                  ┌─────────────┐  │
//!                       │                                  │  registry   │  │
//!                       │                                  │ + balancer  │  │
//!                       │                                  └──────┬──────┘  │
//!                       │                                         │ select  │
//!   Client request      │  ┌──────────┐    ┌──────────┐           │         │
//!   ────────────────────┼─▶│ gateway  │───▶│ forward  │◀──────────┘         │
//!   ◀───────────────────┼──│ (axum)   │◀───│ (hyper)  │◀────────────────────┼──── Backend
//!                       │  └──────────┘    └──────────┘                     │
//!                       └───────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use inteli_proxy::config::{load_config, loader::load_from_env};
use inteli_proxy::lifecycle::{shutdown_signal, ProxyServer};
use inteli_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "inteli-proxy")]
#[command(about = "Reverse proxy with agent-registered backends", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults plus PROXY_* variables when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "inteli-proxy starting");
    tracing::info!(
        gateway = %config.gateway.bind_address,
        control = %config.control.bind_address,
        certstore = ?config.auth.certstore_dir,
        subprotocol = %config.control.subprotocol,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut server = ProxyServer::new(config);
    server.start().await?;

    shutdown_signal().await;

    server.stop().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
