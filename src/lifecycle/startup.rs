//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Build the server and its outbound client
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic only arrives once the server is ready

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::http::forward::ForwardError;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to build upstream client: {0}")]
    Client(#[from] ForwardError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Run the proxy with `config` until `shutdown` fires.
pub async fn run(config: ProxyConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.bind_address.clone();
    let server = HttpServer::new(config)?;

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;

    server
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Serve)
}
