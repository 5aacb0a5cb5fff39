//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound each upstream attempt so a hung backend cannot starve the retry budget
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The deadline covers the wait for response headers, not body streaming
//! - A timeout is reported as a distinct `ForwardError` and handled like a transport failure

use std::future::Future;
use std::time::Duration;

use crate::http::forward::ForwardError;

/// Run `attempt`, failing with `ForwardError::Timeout` after `limit`.
pub async fn with_deadline<T, F>(limit: Duration, attempt: F) -> Result<T, ForwardError>
where
    F: Future<Output = Result<T, ForwardError>>,
{
    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ForwardError::Timeout(limit)),
    }
}
