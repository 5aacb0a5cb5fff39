//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → request.rs (RequestContext: host, scheme, identity, upgrade flag)
//!     → gate.rs (primary domain, HTTPS redirect)
//!     → [resilience::retries drives attempts]
//!         → forward.rs (outbound request per backend)
//!         → client.rs (reqwest, redirects disabled)
//!     → finalize.rs (sticky cookie, upgrade headers, 502)
//!     → tunnel.rs (WebSocket bytes after 101)
//!     → Send to client
//! ```

pub mod client;
pub mod finalize;
pub mod forward;
pub mod gate;
pub mod request;
pub mod server;
pub mod tunnel;

pub use request::{RequestContext, X_REQUEST_ID};
pub use server::HttpServer;
