//! Entry gating: primary-domain check and HTTPS redirect.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;

use crate::config::GatewayConfig;
use crate::http::request::RequestContext;

/// Why a request was answered before reaching a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("This proxy is configured to handle requests for {expected} only")]
    HostMismatch { host: String, expected: String },
    #[error("Moved permanently to {location}")]
    InsecureScheme { location: String },
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response<Body> {
        match &self {
            GateRejection::HostMismatch { .. } => {
                let mut response = Response::new(Body::from(self.to_string()));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                response
            }
            GateRejection::InsecureScheme { location } => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
                match HeaderValue::from_str(location) {
                    Ok(value) => {
                        response.headers_mut().insert(header::LOCATION, value);
                    }
                    Err(_) => *response.status_mut() = StatusCode::BAD_REQUEST,
                }
                response
            }
        }
    }
}

/// Host first, then scheme. Development mode lets everything through.
pub fn check(config: &GatewayConfig, ctx: &RequestContext) -> Result<(), GateRejection> {
    if config.development {
        return Ok(());
    }

    if !ctx.host.eq_ignore_ascii_case(config.primary_domain.trim()) {
        return Err(GateRejection::HostMismatch {
            host: ctx.host.clone(),
            expected: config.primary_domain.clone(),
        });
    }

    if ctx.scheme == "http" {
        return Err(GateRejection::InsecureScheme {
            location: format!("https://{}{}", https_authority(&ctx.authority), ctx.path_and_query),
        });
    }

    Ok(())
}

/// Authority for the HTTPS redirect. The plain-HTTP default port is dropped.
fn https_authority(authority: &str) -> &str {
    authority.strip_suffix(":80").unwrap_or(authority)
}
