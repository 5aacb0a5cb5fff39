//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Individual backend variables accepted when `BACKENDS` is not set.
const LEGACY_BACKEND_VARS: [&str; 3] = ["BACKEND_CF", "BACKEND_KOYEB", "BACKEND_DUCK"];

/// Parse a configuration file without validating it.
pub fn read_config_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config_file(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment variables onto `config`.
///
/// `lookup` is usually `std::env::var(..).ok()`; empty values count as unset.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(list) = get("BACKENDS") {
        config.balancer.backends = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    } else {
        let legacy: Vec<String> = LEGACY_BACKEND_VARS.iter().filter_map(|k| get(*k)).collect();
        if !legacy.is_empty() {
            config.balancer.backends = legacy;
        }
    }

    if let Some(v) = get("STICKY_SESSIONS") {
        config.sticky.enabled = parse_bool(&v);
    }
    if let Some(v) = get("SESSION_COOKIE_NAME") {
        config.sticky.cookie_name = v;
    }
    if let Some(v) = get("PRIMARY_DOMAIN") {
        config.gateway.primary_domain = v;
    }
    if let Some(v) = get("DEVELOPMENT") {
        config.gateway.development = parse_bool(&v);
    }
    if let Some(v) = get("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = get("BACKEND_SCHEME") {
        config.balancer.backend_scheme = v.to_ascii_lowercase();
    }

    override_number("SESSION_COOKIE_TTL", get("SESSION_COOKIE_TTL"), &mut config.sticky.ttl_secs);
    override_number(
        "BACKEND_DOWN_TIME",
        get("BACKEND_DOWN_TIME"),
        &mut config.balancer.down_time_ms,
    );
    override_number("MAX_RETRIES", get("MAX_RETRIES"), &mut config.balancer.max_retries);
}

fn override_number<T: FromStr>(key: &str, raw: Option<String>, slot: &mut T) {
    let Some(raw) = raw else { return };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable numeric setting"),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Build the effective configuration: file (if any), then environment, then validation.
pub fn load_effective<F>(path: Option<&Path>, lookup: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => ProxyConfig::default(),
    };
    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
