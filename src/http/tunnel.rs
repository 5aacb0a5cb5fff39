//! WebSocket passthrough.
//!
//! # Data Flow
//! ```text
//! Client ←── upgraded bytes ──→ Proxy ←── upgraded bytes ──→ Backend
//! ```
//!
//! # Design Decisions
//! - Byte-level copy, no frame parsing
//! - Runs in its own task after the 101 response has been returned
//! - Ends when either side closes; dropping both halves closes the other

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::http::forward::PendingUpgrade;

/// Join the client's upgraded connection to the backend's.
pub fn spawn_tunnel(
    client: OnUpgrade,
    backend: PendingUpgrade,
    backend_name: String,
    request_id: String,
) {
    tokio::spawn(async move {
        let (client, backend_io) = tokio::join!(client, backend);

        let mut client = match client {
            Ok(upgraded) => TokioIo::new(upgraded),
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Client upgrade failed");
                return;
            }
        };
        let mut backend_io = match backend_io {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    backend = %backend_name,
                    error = %e,
                    "Backend upgrade failed"
                );
                return;
            }
        };

        tracing::debug!(request_id = %request_id, backend = %backend_name, "Tunnel open");
        match tokio::io::copy_bidirectional(&mut client, &mut backend_io).await {
            Ok((to_backend, to_client)) => tracing::debug!(
                request_id = %request_id,
                backend = %backend_name,
                to_backend,
                to_client,
                "Tunnel closed"
            ),
            Err(e) => tracing::debug!(
                request_id = %request_id,
                backend = %backend_name,
                error = %e,
                "Tunnel closed with error"
            ),
        }
    });
}
