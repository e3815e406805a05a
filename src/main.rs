//! Resilient API gateway.
//!
//! ```text
//!     Client Request
//!     ───▶ request id ─▶ rate limit ─▶ route table ─▶ dispatcher
//!                                                      │
//!                        ┌─────────────────────────────┤
//!                        ▼                             ▼
//!                  response cache            circuit breaker[service]
//!                   (GET, TTL)                         │
//!                                                      ▼
//!                                           retry (backoff, deadline)
//!                                                      │
//!                                                      ▼
//!                                       service locator ─▶ backend instance
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use resilient_gateway::config::{load_config, GatewayConfig};
use resilient_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use resilient_gateway::observability::{logging::init_logging, metrics::init_metrics};
use resilient_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(about = "Resilient API gateway with circuit breaking, retries and rate limiting", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!("resilient-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        routes = config.routes.len(),
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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    GatewayServer::new(config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
