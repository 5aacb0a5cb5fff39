//! Health-aware failover reverse proxy.
//!
//! Spreads traffic across a fixed pool of equivalent backends, pins clients by
//! cookie or address hash, and retries on other backends when one fails.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
