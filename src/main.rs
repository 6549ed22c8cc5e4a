//! SalamBot API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                  SALAMBOT GATEWAY                │
//!     Client Request     │  ┌──────────┐   ┌──────────┐   ┌─────────────┐   │
//!     ───────────────────┼─▶│ security │──▶│ routing  │──▶│ resilience  │   │
//!                        │  │rate/keys │   │ prefixes │   │  breaker    │   │
//!                        │  └──────────┘   └──────────┘   └──────┬──────┘   │
//!                        │                                       ▼          │
//!     Client Response    │  ┌──────────┐                  ┌─────────────┐   │
//!     ◀──────────────────┼──│ response │◀─────────────────│  transport  │◀──┼── ai / rest / websocket
//!                        │  └──────────┘                  └─────────────┘   │
//!                        │                                                  │
//!                        │  ┌────────┐ ┌─────────────┐ ┌─────────────────┐  │
//!                        │  │ health │ │observability│ │    lifecycle    │  │
//!                        │  │checker │ │   metrics   │ │ signals/shutdown│  │
//!                        │  └────────┘ └─────────────┘ └─────────────────┘  │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use salambot_gateway::config::{load_config, GatewayConfig};
use salambot_gateway::lifecycle::signals::wait_for_termination;
use salambot_gateway::observability::logging::init_logging;
use salambot_gateway::{GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "salambot-gateway", version, about = "SalamBot API gateway")]
struct Args {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "SALAMBOT_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listener address.
    #[arg(short, long, env = "SALAMBOT_GATEWAY_BIND")]
    bind: Option<String>,

    /// Override only the listener port (Cloud Run sets `PORT`).
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    } else if let Some(port) = args.port {
        config.listener.bind_address = format!("0.0.0.0:{port}");
    }

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "salambot-gateway starting");
    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        environment = %config.gateway.environment,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    let signal = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { wait_for_termination(&shutdown).await }
    });

    let server = GatewayServer::new(config)?;
    server.run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
