//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → retries.rs (select, forward, classify, mark down, reselect)
//!     → timeouts.rs (per-attempt deadline)
//! ```
//!
//! # Design Decisions
//! - Attempts are strictly sequential within one request
//! - Transport errors and 5xx both mark the backend down
//! - Upgrade requests get exactly one attempt
//! - No backoff between attempts: the next attempt goes to a different backend

pub mod retries;
pub mod timeouts;

pub use retries::{Outcome, RetryOrchestrator};
