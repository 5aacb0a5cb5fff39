//! Retry orchestration.
//!
//! # States
//! ```text
//! Selecting → Forwarding → EvaluatingOutcome
//!     transport error, attempts left → mark down → Selecting
//!     transport error, none left     → mark down → Exhausted (synthesized 502)
//!     5xx, attempts left             → mark down → Selecting
//!     5xx, none left                 → mark down → ServerError (relayed verbatim)
//!     anything else (incl. 101)      → Success
//! ```
//!
//! # Design Decisions
//! - One attempt at a time; each outcome decides the next backend
//! - WebSocket upgrades get a single attempt
//! - The two exhausted paths stay distinct: a final 5xx is relayed, a final
//!   transport failure becomes a 502

use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::health::HealthRegistry;
use crate::http::forward::{ForwardError, RequestForwarder, Upstream, UpstreamResponse};
use crate::http::request::RequestContext;
use crate::load_balancer::BackendSelector;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;

/// Terminal result of the attempt loop.
#[derive(Debug)]
pub enum Outcome {
    /// A backend answered with a non-5xx status.
    Success {
        backend: String,
        response: UpstreamResponse,
        attempts: u32,
    },
    /// The final attempt answered 5xx.
    ServerError {
        backend: String,
        response: UpstreamResponse,
        attempts: u32,
    },
    /// The final attempt failed before any response arrived.
    Exhausted {
        backend: String,
        error: ForwardError,
        attempts: u32,
    },
}

impl Outcome {
    pub fn backend(&self) -> &str {
        match self {
            Outcome::Success { backend, .. }
            | Outcome::ServerError { backend, .. }
            | Outcome::Exhausted { backend, .. } => backend,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. }
            | Outcome::ServerError { attempts, .. }
            | Outcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Drives select → forward → classify until a terminal outcome.
pub struct RetryOrchestrator<U> {
    selector: BackendSelector,
    registry: Arc<HealthRegistry>,
    forwarder: RequestForwarder,
    upstream: U,
    max_retries: u32,
    attempt_timeout: Duration,
}

impl<U: Upstream> RetryOrchestrator<U> {
    pub fn new(
        selector: BackendSelector,
        registry: Arc<HealthRegistry>,
        forwarder: RequestForwarder,
        upstream: U,
        max_retries: u32,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            selector,
            registry,
            forwarder,
            upstream,
            max_retries,
            attempt_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig, registry: Arc<HealthRegistry>, upstream: U) -> Self {
        Self::new(
            BackendSelector::from_config(config),
            registry,
            RequestForwarder::new(config.balancer.backend_scheme.clone()),
            upstream,
            config.balancer.max_retries,
            Duration::from_secs(config.timeouts.attempt_secs),
        )
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Attempt budget for a request.
    pub fn max_attempts(&self, ctx: &RequestContext) -> u32 {
        let budget = if ctx.is_upgrade {
            self.max_retries.min(1)
        } else {
            self.max_retries
        };
        budget.max(1)
    }

    pub async fn run(&self, ctx: &RequestContext) -> Outcome {
        let max_attempts = self.max_attempts(ctx);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let selection = self.selector.select(&self.registry, ctx);
            let backend = selection.backend;
            if attempts == 1 {
                tracing::info!(
                    request_id = %ctx.request_id,
                    backend,
                    affinity = ?selection.affinity,
                    attempt = attempts,
                    max_attempts,
                    "Routing request"
                );
            } else {
                metrics::record_retry();
                tracing::info!(
                    request_id = %ctx.request_id,
                    backend,
                    affinity = ?selection.affinity,
                    attempt = attempts,
                    max_attempts,
                    "Retrying request"
                );
            }

            let result = match self.forwarder.build(ctx, backend) {
                Ok(outbound) => {
                    with_deadline(self.attempt_timeout, self.upstream.send(outbound)).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(response) if response.response.status().is_server_error() => {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        backend,
                        status = %response.response.status(),
                        attempt = attempts,
                        "Backend returned server error"
                    );
                    self.registry.mark_down(backend);
                    if attempts < max_attempts {
                        continue;
                    }
                    return Outcome::ServerError {
                        backend: backend.to_string(),
                        response,
                        attempts,
                    };
                }
                Ok(response) => {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        backend,
                        status = %response.response.status(),
                        attempt = attempts,
                        "Successfully routed"
                    );
                    return Outcome::Success {
                        backend: backend.to_string(),
                        response,
                        attempts,
                    };
                }
                Err(error) => {
                    tracing::error!(
                        request_id = %ctx.request_id,
                        backend,
                        error = %error,
                        attempt = attempts,
                        "Error forwarding to backend"
                    );
                    self.registry.mark_down(backend);
                    if attempts < max_attempts {
                        continue;
                    }
                    return Outcome::Exhausted {
                        backend: backend.to_string(),
                        error,
                        attempts,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::forward::OutboundRequest;
    use axum::body::Body;
    use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Step {
        Status(u16),
        Fail,
        Hang,
    }

    /// Upstream that answers per backend and records every call.
    struct Scripted {
        steps: HashMap<&'static str, Step>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(steps: &[(&'static str, Step)]) -> Self {
            Self {
                steps: steps.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Upstream for Arc<Scripted> {
        async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
            self.calls.lock().unwrap().push(request.backend.clone());
            match self.steps[request.backend.as_str()] {
                Step::Status(code) => {
                    let body = Body::from(format!("from {}", request.backend));
                    let mut response = Response::new(body);
                    *response.status_mut() = StatusCode::from_u16(code).unwrap();
                    Ok(UpstreamResponse::new(response))
                }
                Step::Fail => Err(ForwardError::transport("connection refused")),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(ForwardError::transport("unreachable"))
                }
            }
        }
    }

    const A: &str = "a.example";
    const B: &str = "b.example";
    const C: &str = "c.example";

    fn orchestrator(
        upstream: &Arc<Scripted>,
        max_retries: u32,
    ) -> RetryOrchestrator<Arc<Scripted>> {
        RetryOrchestrator::new(
            BackendSelector::new(
                vec![A.into(), B.into(), C.into()],
                Duration::from_secs(30),
                None,
            ),
            Arc::new(HealthRegistry::new()),
            RequestForwarder::new("https"),
            upstream.clone(),
            max_retries,
            Duration::from_millis(100),
        )
    }

    /// Client "1.2.3.4" hashes to index 0 of any pool of size 1, 2 or 3.
    fn ctx(upgrade: bool) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        if upgrade {
            headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
            headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        }
        RequestContext::for_test(headers)
    }

    #[tokio::test]
    async fn healthy_pool_uses_hashed_backend_once() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Status(200)),
            (B, Step::Status(200)),
            (C, Step::Status(200)),
        ]));
        let outcome = orchestrator(&upstream, 3).run(&ctx(false)).await;

        assert!(matches!(outcome, Outcome::Success { .. }));
        assert_eq!(outcome.backend(), A);
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(upstream.calls(), vec![A]);
    }

    #[tokio::test]
    async fn server_error_fails_over_to_another_backend() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Status(503)),
            (B, Step::Status(200)),
            (C, Step::Status(200)),
        ]));
        let orchestrator = orchestrator(&upstream, 3);
        let outcome = orchestrator.run(&ctx(false)).await;

        assert!(matches!(outcome, Outcome::Success { .. }));
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(upstream.calls(), vec![A, B]);
        assert!(orchestrator.registry().get(A).unwrap().is_down);
        assert!(orchestrator.registry().get(B).is_none());
    }

    #[tokio::test]
    async fn exhausted_server_errors_relay_last_response() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Status(500)),
            (B, Step::Status(502)),
            (C, Step::Status(503)),
        ]));
        let orchestrator = orchestrator(&upstream, 3);
        let outcome = orchestrator.run(&ctx(false)).await;

        assert_eq!(upstream.calls(), vec![A, B, C]);
        match outcome {
            Outcome::ServerError { backend, response, attempts } => {
                assert_eq!(backend, C);
                assert_eq!(attempts, 3);
                assert_eq!(response.response.status(), StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("expected relayed server error, got {other:?}"),
        }
        for b in [A, B, C] {
            assert!(orchestrator.registry().get(b).unwrap().is_down);
        }
    }

    #[tokio::test]
    async fn exhausted_transport_failures_are_reported() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Fail),
            (B, Step::Fail),
            (C, Step::Fail),
        ]));
        let outcome = orchestrator(&upstream, 3).run(&ctx(false)).await;

        assert_eq!(upstream.calls(), vec![A, B, C]);
        assert!(matches!(
            outcome,
            Outcome::Exhausted { attempts: 3, error: ForwardError::Transport(_), .. }
        ));
    }

    #[tokio::test]
    async fn final_attempt_classification_decides_terminal_state() {
        // Transport failures first, then a 5xx on the last attempt: relayed, not 502.
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Fail),
            (B, Step::Fail),
            (C, Step::Status(500)),
        ]));
        let outcome = orchestrator(&upstream, 3).run(&ctx(false)).await;
        assert!(matches!(outcome, Outcome::ServerError { attempts: 3, .. }));

        // 5xx first, transport failure last: synthesized 502 path.
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Status(500)),
            (B, Step::Status(500)),
            (C, Step::Fail),
        ]));
        let outcome = orchestrator(&upstream, 3).run(&ctx(false)).await;
        assert!(matches!(outcome, Outcome::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn upgrade_requests_get_one_attempt() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Fail),
            (B, Step::Status(101)),
            (C, Step::Status(101)),
        ]));
        let orchestrator = orchestrator(&upstream, 3);
        let ctx = ctx(true);
        assert_eq!(orchestrator.max_attempts(&ctx), 1);

        let outcome = orchestrator.run(&ctx).await;
        assert_eq!(upstream.calls(), vec![A]);
        assert!(matches!(outcome, Outcome::Exhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn switching_protocols_is_success() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Status(101)),
            (B, Step::Status(200)),
            (C, Step::Status(200)),
        ]));
        let outcome = orchestrator(&upstream, 3).run(&ctx(true)).await;
        assert!(matches!(outcome, Outcome::Success { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Status(404)),
            (B, Step::Status(200)),
            (C, Step::Status(200)),
        ]));
        let orchestrator = orchestrator(&upstream, 3);
        let outcome = orchestrator.run(&ctx(false)).await;
        assert!(matches!(outcome, Outcome::Success { attempts: 1, .. }));
        assert!(orchestrator.registry().get(A).is_none());
    }

    #[tokio::test]
    async fn hung_attempt_times_out_and_fails_over() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Hang),
            (B, Step::Status(200)),
            (C, Step::Status(200)),
        ]));
        let outcome = orchestrator(&upstream, 3).run(&ctx(false)).await;
        assert!(matches!(outcome, Outcome::Success { attempts: 2, .. }));
        assert_eq!(outcome.backend(), B);
    }

    #[tokio::test]
    async fn budget_larger_than_pool_wraps_through_reset() {
        let upstream = Arc::new(Scripted::new(&[
            (A, Step::Fail),
            (B, Step::Fail),
            (C, Step::Fail),
        ]));
        let outcome = orchestrator(&upstream, 5).run(&ctx(false)).await;
        // a, b, c, then the pool is reset and hashing starts over at a, b.
        assert_eq!(upstream.calls(), vec![A, B, C, A, B]);
        assert!(matches!(outcome, Outcome::Exhausted { attempts: 5, .. }));
    }
}
