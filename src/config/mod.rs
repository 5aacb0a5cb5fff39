//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → loader.rs (optional TOML file)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_effective, ConfigError};
pub use schema::{
    BalancerConfig, GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    StickyConfig, TimeoutConfig,
};
