//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Request outcome observed by the retry loop
//!     → transport error or 5xx
//!     → registry.rs mark_down(backend)
//!
//! Backend selection
//!     → registry.rs is_available(backend, cooldown)
//!     → expired cooldown resets the entry lazily
//!     → empty pool triggers reset_all
//! ```
//!
//! # Design Decisions
//! - Passive only: failures are observed from live traffic
//! - Health is a soft hint; late transitions under races are acceptable
//! - Health state is per-backend, shared process-wide via Arc

pub mod registry;

pub use registry::{BackendHealth, HealthRegistry, HealthSnapshot};
