//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing)
//! - Gate requests by host and scheme
//! - Buffer replayable bodies and run the retry loop
//! - Finalize responses and hand upgrades to the tunnel

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use http_body_util::LengthLimitError;
use hyper::upgrade::OnUpgrade;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{GatewayConfig, ProxyConfig};
use crate::health::HealthRegistry;
use crate::http::client::HttpUpstream;
use crate::http::finalize::{Finalized, ResponseFinalizer};
use crate::http::forward::{ForwardError, Upstream};
use crate::http::gate;
use crate::http::request::RequestContext;
use crate::http::tunnel::spawn_tunnel;
use crate::observability::metrics;
use crate::resilience::RetryOrchestrator;

/// Application state injected into handlers.
pub struct AppState<U> {
    pub gateway: Arc<GatewayConfig>,
    pub orchestrator: Arc<RetryOrchestrator<U>>,
    pub finalizer: Arc<ResponseFinalizer>,
    pub max_body_bytes: usize,
}

impl<U> Clone for AppState<U> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            orchestrator: self.orchestrator.clone(),
            finalizer: self.finalizer.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// HTTP server for the failover proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    registry: Arc<HealthRegistry>,
}

impl HttpServer {
    /// Create a server that reaches backends over the network.
    pub fn new(config: ProxyConfig) -> Result<Self, ForwardError> {
        let upstream = HttpUpstream::new(&config.timeouts)?;
        Ok(Self::with_upstream(config, upstream))
    }

    /// Create a server around any upstream implementation.
    pub fn with_upstream<U: Upstream>(config: ProxyConfig, upstream: U) -> Self {
        let registry = Arc::new(HealthRegistry::new());
        let state = AppState {
            gateway: Arc::new(config.gateway.clone()),
            orchestrator: Arc::new(RetryOrchestrator::from_config(
                &config,
                registry.clone(),
                upstream,
            )),
            finalizer: Arc::new(ResponseFinalizer::from_config(&config)),
            max_body_bytes: config.limits.max_body_bytes,
        };

        Self {
            router: Self::build_router(state),
            config,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router<U: Upstream>(state: AppState<U>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler::<U>))
            .route("/", any(proxy_handler::<U>))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = ?self.config.balancer.backends,
            sticky_sessions = self.config.sticky.enabled,
            development = self.config.gateway.development,
            "HTTP server starting"
        );

        let registry = self.registry.clone();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        for entry in registry.snapshot() {
            tracing::info!(
                backend = %entry.backend,
                is_down = entry.is_down,
                down_for = ?entry.down_for,
                "Backend health at shutdown"
            );
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The router, for driving the proxy without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Health registry shared by every request.
    pub fn registry(&self) -> Arc<HealthRegistry> {
        self.registry.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Gates, buffers the body, runs the retry loop and finalizes the response.
async fn proxy_handler<U: Upstream>(
    State(state): State<AppState<U>>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let (mut parts, body) = request.into_parts();
    let on_upgrade = parts.extensions.remove::<OnUpgrade>();
    let mut ctx = RequestContext::from_parts(&parts);
    let method = ctx.method.to_string();

    tracing::debug!(
        request_id = %ctx.request_id,
        method = %method,
        host = %ctx.host,
        path = %ctx.path_and_query,
        upgrade = ctx.is_upgrade,
        "Proxying request"
    );

    // 1. Gate
    if let Err(rejection) = gate::check(&state.gateway, &ctx) {
        tracing::info!(
            request_id = %ctx.request_id,
            host = %ctx.host,
            reason = %rejection,
            "Request handled at gate"
        );
        let response = rejection.into_response();
        metrics::record_request(&method, response.status().as_u16(), "none", start_time);
        return response;
    }

    // 2. Buffer body so every attempt can replay it
    if !ctx.is_upgrade {
        match axum::body::to_bytes(body, state.max_body_bytes).await {
            Ok(bytes) => ctx.body = bytes,
            Err(e) => {
                let too_large = e.into_inner().is::<LengthLimitError>();
                let status = if too_large {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                };
                tracing::warn!(
                    request_id = %ctx.request_id,
                    status = %status,
                    "Failed to read request body"
                );
                metrics::record_request(&method, status.as_u16(), "none", start_time);
                return (status, "Request body could not be buffered").into_response();
            }
        }
    }

    // 3. Retry loop
    let outcome = state.orchestrator.run(&ctx).await;

    // 4. Finalize
    let Finalized {
        response,
        backend,
        upgrade,
    } = state.finalizer.finalize(outcome, &ctx);

    metrics::record_request(&method, response.status().as_u16(), &backend, start_time);

    if let Some(pending) = upgrade {
        match on_upgrade {
            Some(client) => spawn_tunnel(client, pending, backend, ctx.request_id.clone()),
            None => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    backend = %backend,
                    "Backend accepted upgrade but client connection cannot be upgraded"
                );
                return (StatusCode::BAD_GATEWAY, "Upgrade not supported on this connection")
                    .into_response();
            }
        }
    }

    response
}
