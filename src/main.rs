//! Failover reverse proxy.
//!
//! ```text
//!     Client ──▶ gate ──▶ selector ──▶ retry loop ──▶ backend A/B/C
//!                 │           │            │
//!                 │      health registry ◀─┘
//!                 ▼
//!          404 / 301 redirect
//! ```

use std::path::PathBuf;

use clap::Parser;

use failover_proxy::config::load_effective;
use failover_proxy::lifecycle::{self, signals, Shutdown};
use failover_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "failover-proxy")]
#[command(about = "Health-aware HTTP failover proxy", long_about = None)]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides config and BIND_ADDRESS.
    #[arg(short, long)]
    bind: Option<String>,

    /// Development mode: skip host gating and the HTTPS redirect.
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Flags act as the highest-priority environment so validation sees them.
    let config = load_effective(cli.config.as_deref(), |key: &str| match key {
        "BIND_ADDRESS" if cli.bind.is_some() => cli.bind.clone(),
        "DEVELOPMENT" if cli.dev => Some("true".to_string()),
        _ => std::env::var(key).ok(),
    })?;

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        backends = config.balancer.backends.len(),
        max_retries = config.balancer.max_retries,
        "failover-proxy starting"
    );

    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    lifecycle::run(config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
