//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (cookies, client identity)
//!     → selector.rs (filter by health registry, reset if empty)
//!     → cookie.rs (sticky session lookup)
//!     → hash.rs (client identity → index into available set)
//!     → exactly one backend hostname
//! ```
//!
//! # Design Decisions
//! - Selector is stateless; health lives in the registry
//! - Sticky affinity wins while the pinned backend is available
//! - Hashing over the available set gives stable assignment without cookies
//! - An empty available set is never returned to callers

pub mod cookie;
pub mod hash;
pub mod selector;

pub use selector::{client_identity, Affinity, BackendSelector, Selection};
