//! Outbound request construction and the upstream seam.
//!
//! # Responsibilities
//! - Rewrite an inbound request to target a chosen backend
//! - Define the `Upstream` trait the retry loop sends through
//!
//! # Design Decisions
//! - Path and query copied verbatim; only the authority changes
//! - All inbound headers copied, then Host and X-Forwarded-* overwritten
//! - Body framing headers are rebuilt by the client, not copied
//! - Upgrade requests are sent without a body and flagged for HTTP/1.1

use std::future::Future;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, Response};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::request::{RequestContext, X_FORWARDED_PROTO};

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Error raised while forwarding a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream request: {0}")]
    Build(String),
    #[error("upstream transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ForwardError::Transport(err.into())
    }
}

/// Byte stream left behind by a completed protocol upgrade.
pub trait Tunnel: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Tunnel for T {}

pub type BoxTunnel = Box<dyn Tunnel>;

/// Resolves to the backend side of an upgraded connection.
pub type PendingUpgrade = BoxFuture<'static, Result<BoxTunnel, ForwardError>>;

/// One attempt's request, addressed to a single backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub backend: String,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub upgrade: bool,
}

/// A backend's answer. `upgrade` is set only for `101 Switching Protocols`.
pub struct UpstreamResponse {
    pub response: Response<Body>,
    pub upgrade: Option<PendingUpgrade>,
}

impl UpstreamResponse {
    pub fn new(response: Response<Body>) -> Self {
        Self {
            response,
            upgrade: None,
        }
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.response.status())
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// Anything that can carry an outbound request to a backend.
pub trait Upstream: Send + Sync + 'static {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<UpstreamResponse, ForwardError>> + Send;
}

/// Builds outbound requests for a fixed backend scheme.
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    scheme: String,
}

impl RequestForwarder {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    pub fn build(
        &self,
        ctx: &RequestContext,
        backend: &str,
    ) -> Result<OutboundRequest, ForwardError> {
        let mut headers = ctx.headers.clone();
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);

        headers.insert(header::HOST, header_value(backend)?);
        headers.insert(X_FORWARDED_HOST, header_value(&ctx.host)?);
        headers.insert(X_FORWARDED_PROTO, header_value(&ctx.scheme)?);

        Ok(OutboundRequest {
            backend: backend.to_string(),
            method: ctx.method.clone(),
            url: format!("{}://{}{}", self.scheme, backend, ctx.path_and_query),
            headers,
            body: if ctx.is_upgrade {
                Bytes::new()
            } else {
                ctx.body.clone()
            },
            upgrade: ctx.is_upgrade,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ForwardError> {
    HeaderValue::from_str(value).map_err(|e| ForwardError::Build(format!("{value:?}: {e}")))
}
