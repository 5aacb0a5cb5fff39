//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the failover proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend pool, health cooldown and retry budget.
    pub balancer: BalancerConfig,

    /// Sticky-session cookie settings.
    pub sticky: StickyConfig,

    /// Domain and scheme gating.
    pub gateway: GatewayConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backend pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Ordered list of backend hostnames. Order matters for hash selection.
    pub backends: Vec<String>,

    /// Scheme used to reach the backends ("https" or "http").
    pub backend_scheme: String,

    /// How long a backend stays down after a failure, in milliseconds.
    pub down_time_ms: u64,

    /// Maximum number of attempts per request.
    pub max_retries: u32,
}

impl BalancerConfig {
    pub fn down_time(&self) -> Duration {
        Duration::from_millis(self.down_time_ms)
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            backend_scheme: "https".to_string(),
            down_time_ms: 30_000,
            max_retries: 3,
        }
    }
}

/// Sticky-session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StickyConfig {
    /// Pin clients to a backend via cookie.
    pub enabled: bool,

    /// Name of the session cookie.
    pub cookie_name: String,

    /// Cookie lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: "backend".to_string(),
            ttl_secs: 86_400,
        }
    }
}

/// Entry gating configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// The only hostname served outside development mode.
    pub primary_domain: String,

    /// Development mode disables host gating and the HTTPS redirect.
    pub development: bool,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for a single attempt to produce response headers, in seconds.
    pub attempt_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            attempt_secs: 30,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request body buffered for replay across attempts.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
