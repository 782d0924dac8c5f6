//! Gatekeeper admission service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ rate limiter ──▶ auth pipeline ──▶ route guard ──▶ handler
//!                     (per-IP bucket)  (bearer token →   (activated,     │
//!                                       Principal)        capability)    ▼
//!                                                                   store traits
//!                                                                   (memory / PostgreSQL)
//!
//!     Cross-cutting: config, structured logging, metrics, background tasks,
//!     graceful shutdown
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use gatekeeper::config::loader::load_config;
use gatekeeper::http::HttpServer;
use gatekeeper::lifecycle::{signals, startup, Shutdown};
use gatekeeper::notify::LogNotifier;
use gatekeeper::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(about = "Account admission and capability-gated HTTP service", long_about = None)]
struct Args {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("failed to load configuration")?;

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatekeeper starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let backend = startup::build_backend(&config)
        .await
        .context("failed to connect the backing store")?;

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listener.bind_address))?;

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(config, backend, Arc::new(LogNotifier));
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
