//! Per-request context.
//!
//! # Responsibilities
//! - Capture method, path, query and headers once per request
//! - Resolve the original host and scheme for gating and forwarding headers
//! - Derive client identity and the WebSocket upgrade flag
//!
//! # Design Decisions
//! - Immutable after construction; shared by reference across attempts
//! - Body is buffered so every attempt can replay it

use axum::body::Bytes;
use axum::http::{header, request::Parts, uri::Authority, HeaderMap, Method};

use crate::load_balancer::client_identity;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Everything the proxy needs to know about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Path plus `?query`, verbatim.
    pub path_and_query: String,
    pub headers: HeaderMap,
    /// Hostname without port, lowercased.
    pub host: String,
    /// Host as sent by the client, port included.
    pub authority: String,
    /// "http" or "https", without the trailing delimiter.
    pub scheme: String,
    pub client_identity: String,
    pub is_upgrade: bool,
    pub request_id: String,
    pub body: Bytes,
}

impl RequestContext {
    /// Build a context from request parts. The body is attached separately.
    pub fn from_parts(parts: &Parts) -> Self {
        let headers = parts.headers.clone();

        let authority = parts
            .uri
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| header_str(&headers, header::HOST.as_str()).map(String::from))
            .unwrap_or_default();
        let host = authority
            .parse::<Authority>()
            .map(|a| a.host().to_ascii_lowercase())
            .unwrap_or_else(|_| authority.to_ascii_lowercase());

        let scheme = parts
            .uri
            .scheme_str()
            .map(String::from)
            .or_else(|| {
                header_str(&headers, X_FORWARDED_PROTO)
                    .and_then(|v| v.split(',').next())
                    .map(|v| v.trim().to_ascii_lowercase())
            })
            .unwrap_or_else(|| "http".to_string());

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Self {
            method: parts.method.clone(),
            path_and_query,
            is_upgrade: is_websocket_upgrade(&headers),
            client_identity: client_identity(&headers),
            request_id: header_str(&headers, X_REQUEST_ID)
                .unwrap_or("unknown")
                .to_string(),
            host,
            authority,
            scheme,
            headers,
            body: Bytes::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(headers: HeaderMap) -> Self {
        let mut parts = axum::http::Request::builder()
            .uri("/test")
            .header(header::HOST, "primary.example")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        parts.headers.extend(headers);
        Self::from_parts(&parts)
    }
}

/// `Upgrade: websocket`, compared case-insensitively.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
