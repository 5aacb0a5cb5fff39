//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (retries >= 1, timeouts > 0)
//! - Reject backend lists that would make selection ambiguous
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,
    #[error("backend entry {0} is empty")]
    EmptyBackend(usize),
    #[error("backend {0} is listed more than once")]
    DuplicateBackend(String),
    #[error("backend scheme must be http or https, got {0:?}")]
    InvalidScheme(String),
    #[error("max_retries must be at least 1")]
    ZeroRetries,
    #[error("cookie name {0:?} is not a valid cookie token")]
    InvalidCookieName(String),
    #[error("primary_domain is required outside development mode")]
    MissingPrimaryDomain,
    #[error("attempt timeout must be greater than zero")]
    ZeroAttemptTimeout,
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let backends = &config.balancer.backends;
    if backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    let mut seen = HashSet::new();
    for (i, backend) in backends.iter().enumerate() {
        if backend.trim().is_empty() {
            errors.push(ValidationError::EmptyBackend(i));
        } else if !seen.insert(backend.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.clone()));
        }
    }

    let scheme = config.balancer.backend_scheme.as_str();
    if scheme != "http" && scheme != "https" {
        errors.push(ValidationError::InvalidScheme(scheme.to_string()));
    }

    if config.balancer.max_retries == 0 {
        errors.push(ValidationError::ZeroRetries);
    }

    if !is_cookie_token(&config.sticky.cookie_name) {
        errors.push(ValidationError::InvalidCookieName(config.sticky.cookie_name.clone()));
    }

    if !config.gateway.development && config.gateway.primary_domain.trim().is_empty() {
        errors.push(ValidationError::MissingPrimaryDomain);
    }

    if config.timeouts.attempt_secs == 0 {
        errors.push(ValidationError::ZeroAttemptTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// RFC 6265 cookie-name: a non-empty token with no separators or controls.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}
