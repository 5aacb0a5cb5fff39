//! Response finalization.
//!
//! # Responsibilities
//! - Turn a retry-loop outcome into the client response
//! - Attach the sticky-session cookie on success
//! - Restore upgrade headers on `101` responses
//! - Synthesize the `502` for exhausted transport failures

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use chrono::{DateTime, TimeDelta, Utc};

use crate::config::ProxyConfig;
use crate::http::forward::{PendingUpgrade, UpstreamResponse};
use crate::http::request::RequestContext;
use crate::resilience::retries::Outcome;

pub const UNAVAILABLE_BODY: &str = "All backends are currently unavailable";
pub const UNAVAILABLE_RETRY_AFTER_SECS: u64 = 30;

/// HTTP-date layout used in `Expires` (RFC 1123, always GMT).
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone)]
pub struct StickyCookie {
    pub name: String,
    pub ttl_secs: u64,
}

/// Final response plus anything the handler still has to drive.
pub struct Finalized {
    pub response: Response<Body>,
    pub backend: String,
    pub upgrade: Option<PendingUpgrade>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseFinalizer {
    sticky: Option<StickyCookie>,
}

impl ResponseFinalizer {
    pub fn new(sticky: Option<StickyCookie>) -> Self {
        Self { sticky }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.sticky.enabled.then(|| StickyCookie {
            name: config.sticky.cookie_name.clone(),
            ttl_secs: config.sticky.ttl_secs,
        }))
    }

    pub fn finalize(&self, outcome: Outcome, ctx: &RequestContext) -> Finalized {
        self.finalize_at(outcome, ctx, Utc::now())
    }

    pub(crate) fn finalize_at(
        &self,
        outcome: Outcome,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Finalized {
        match outcome {
            Outcome::Success { backend, response, .. } => {
                let UpstreamResponse { mut response, upgrade } = response;

                if let Some(sticky) = &self.sticky {
                    let expires = expires_at(now, sticky.ttl_secs);
                    let cookie = set_cookie_value(&sticky.name, &backend, expires);
                    match HeaderValue::from_str(&cookie) {
                        Ok(value) => {
                            response.headers_mut().append(header::SET_COOKIE, value);
                        }
                        Err(e) => tracing::warn!(
                            backend = %backend,
                            error = %e,
                            "Skipping unencodable session cookie"
                        ),
                    }
                }

                let switching = response.status() == StatusCode::SWITCHING_PROTOCOLS;
                if ctx.is_upgrade && switching {
                    let headers = response.headers_mut();
                    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
                    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
                }

                Finalized {
                    response,
                    backend,
                    upgrade: upgrade.filter(|_| ctx.is_upgrade && switching),
                }
            }
            Outcome::ServerError { backend, response, .. } => Finalized {
                response: response.response,
                backend,
                upgrade: None,
            },
            Outcome::Exhausted { backend, .. } => Finalized {
                response: unavailable_response(),
                backend,
                upgrade: None,
            },
        }
    }
}

/// `502` returned once every attempt failed at the transport level.
pub fn unavailable_response() -> Response<Body> {
    let mut response = Response::new(Body::from(UNAVAILABLE_BODY));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(UNAVAILABLE_RETRY_AFTER_SECS));
    response
}

pub fn set_cookie_value(name: &str, backend: &str, expires: DateTime<Utc>) -> String {
    format!(
        "{name}={backend}; Path=/; HttpOnly; SameSite=Lax; Expires={}",
        expires.format(HTTP_DATE)
    )
}

fn expires_at(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
