//! reqwest-backed upstream.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Response, StatusCode};

use crate::config::TimeoutConfig;
use crate::http::forward::{BoxTunnel, ForwardError, OutboundRequest, Upstream, UpstreamResponse};

/// Sends outbound requests over HTTP(S) with redirects disabled.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    /// HTTP/1.1-only client; upgrades cannot ride an HTTP/2 connection.
    upgrade_client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, ForwardError> {
        let connect = Duration::from_secs(timeouts.connect_secs);
        let builder = || {
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .connect_timeout(connect)
                .no_proxy()
        };

        Ok(Self {
            client: builder().build().map_err(ForwardError::transport)?,
            upgrade_client: builder().http1_only().build().map_err(ForwardError::transport)?,
        })
    }
}

impl Upstream for HttpUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
        let client = if request.upgrade {
            &self.upgrade_client
        } else {
            &self.client
        };

        let mut builder = client
            .request(request.method, &request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let upstream = builder.send().await.map_err(ForwardError::transport)?;
        let status = upstream.status();
        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            *headers = upstream.headers().clone();
            headers.remove(header::TRANSFER_ENCODING);
        }

        if status == StatusCode::SWITCHING_PROTOCOLS {
            let response = response
                .body(Body::empty())
                .map_err(|e| ForwardError::Build(e.to_string()))?;
            let upgrade = Box::pin(async move {
                upstream
                    .upgrade()
                    .await
                    .map(|io| Box::new(io) as BoxTunnel)
                    .map_err(ForwardError::transport)
            });
            return Ok(UpstreamResponse {
                response,
                upgrade: Some(upgrade),
            });
        }

        let response = response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ForwardError::Build(e.to_string()))?;
        Ok(UpstreamResponse::new(response))
    }
}
