//! Backend selection: sticky cookie first, then client-identity hashing.

use std::time::Duration;

use axum::http::HeaderMap;

use crate::config::ProxyConfig;
use crate::health::HealthRegistry;
use crate::http::request::RequestContext;
use crate::load_balancer::{cookie::session_cookie, hash::bucket};

/// Client-IP header set by a trusted edge proxy.
pub const CONNECTING_IP_HEADER: &str = "cf-connecting-ip";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Identity used when no client-IP header is present.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Why a backend was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// The session cookie named an available backend.
    Cookie,
    /// Hash of the client identity over the available set.
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub backend: &'a str,
    pub affinity: Affinity,
}

/// Picks exactly one backend per call.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    backends: Vec<String>,
    cooldown: Duration,
    /// Cookie name when sticky sessions are enabled.
    sticky_cookie: Option<String>,
}

impl BackendSelector {
    /// `backends` must be non-empty (enforced by config validation).
    pub fn new(backends: Vec<String>, cooldown: Duration, sticky_cookie: Option<String>) -> Self {
        Self {
            backends,
            cooldown,
            sticky_cookie,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.balancer.backends.clone(),
            config.balancer.down_time(),
            config
                .sticky
                .enabled
                .then(|| config.sticky.cookie_name.clone()),
        )
    }

    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Select a backend for a request.
    pub fn select(&self, registry: &HealthRegistry, ctx: &RequestContext) -> Selection<'_> {
        let pinned = self
            .sticky_cookie
            .as_deref()
            .and_then(|name| session_cookie(&ctx.headers, name));
        self.choose(registry, pinned, &ctx.client_identity)
    }

    /// Core algorithm, given the pinned backend (if any) and the client identity.
    pub fn choose(
        &self,
        registry: &HealthRegistry,
        pinned: Option<&str>,
        identity: &str,
    ) -> Selection<'_> {
        let mut available: Vec<&str> = self
            .backends
            .iter()
            .map(String::as_str)
            .filter(|b| registry.is_available(b, self.cooldown))
            .collect();

        if available.is_empty() {
            tracing::warn!(
                backends = self.backends.len(),
                "All backends marked down, resetting health"
            );
            registry.reset_all(&self.backends);
            available = self.backends.iter().map(String::as_str).collect();
        }

        if let Some(pinned) = pinned {
            if let Some(backend) = available.iter().copied().find(|b| *b == pinned) {
                return Selection {
                    backend,
                    affinity: Affinity::Cookie,
                };
            }
            tracing::debug!(pinned, "Pinned backend unavailable, falling back to hash");
        }

        Selection {
            backend: available[bucket(identity, available.len())],
            affinity: Affinity::Hash,
        }
    }
}

/// First non-empty of the connecting-IP, real-IP and first forwarded-for entry.
pub fn client_identity(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header(CONNECTING_IP_HEADER)
        .or_else(|| header(REAL_IP_HEADER))
        .or_else(|| {
            header(FORWARDED_FOR_HEADER)
                .and_then(|list| list.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
