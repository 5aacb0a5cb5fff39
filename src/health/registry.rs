//! Process-wide backend health registry.
//!
//! # Responsibilities
//! - Record backends that failed a request (`mark_down`)
//! - Answer availability queries with lazy cooldown expiry
//! - Force every backend healthy when the whole pool looks down
//!
//! # Design Decisions
//! - Entries are created on first failure; no entry means healthy
//! - No background sweeper: a query that observes an expired cooldown resets the entry
//! - Per-key locking (DashMap shards); no cross-key transactions

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::observability::metrics;

/// Health record for a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHealth {
    pub is_down: bool,
    /// Moment of the most recent failure. Always set while `is_down`.
    pub last_failure: Option<Instant>,
}

impl BackendHealth {
    fn down_at(now: Instant) -> Self {
        Self {
            is_down: true,
            last_failure: Some(now),
        }
    }

    fn healthy() -> Self {
        Self {
            is_down: false,
            last_failure: None,
        }
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub backend: String,
    pub is_down: bool,
    pub down_for: Option<Duration>,
}

/// Shared health state, keyed by backend hostname.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    entries: DashMap<String, BackendHealth>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `backend` as down as of now. Repeated calls refresh the timestamp.
    pub fn mark_down(&self, backend: &str) {
        self.mark_down_at(backend, Instant::now());
        tracing::error!(
            backend,
            at = %chrono::Utc::now().to_rfc3339(),
            "Backend marked as down"
        );
        metrics::record_backend_down(backend);
    }

    pub(crate) fn mark_down_at(&self, backend: &str, now: Instant) {
        self.entries
            .insert(backend.to_string(), BackendHealth::down_at(now));
    }

    /// Returns true if `backend` may receive traffic.
    ///
    /// A down backend whose cooldown has elapsed is reset to healthy here.
    pub fn is_available(&self, backend: &str, cooldown: Duration) -> bool {
        self.is_available_at(backend, cooldown, Instant::now())
    }

    pub(crate) fn is_available_at(&self, backend: &str, cooldown: Duration, now: Instant) -> bool {
        let Some(mut entry) = self.entries.get_mut(backend) else {
            return true;
        };
        if !entry.is_down {
            return true;
        }

        let elapsed = entry
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if elapsed > cooldown {
            *entry = BackendHealth::healthy();
            drop(entry);
            tracing::info!(
                backend,
                down_for_ms = elapsed.as_millis() as u64,
                "Backend cooldown expired"
            );
            metrics::record_backend_health(backend, true);
            return true;
        }
        false
    }

    /// Force every listed backend back to healthy.
    pub fn reset_all<S: AsRef<str>>(&self, backends: &[S]) {
        for backend in backends {
            let backend = backend.as_ref();
            self.entries
                .insert(backend.to_string(), BackendHealth::healthy());
            metrics::record_backend_health(backend, true);
        }
        metrics::record_health_reset();
    }

    /// Current health entry for `backend`, if it ever failed.
    pub fn get(&self, backend: &str) -> Option<BackendHealth> {
        self.entries.get(backend).map(|e| *e)
    }

    /// All entries, sorted by backend name.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let now = Instant::now();
        let mut out: Vec<HealthSnapshot> = self
            .entries
            .iter()
            .map(|e| HealthSnapshot {
                backend: e.key().clone(),
                is_down: e.is_down,
                down_for: e
                    .last_failure
                    .filter(|_| e.is_down)
                    .map(|at| now.saturating_duration_since(at)),
            })
            .collect();
        out.sort_by(|a, b| a.backend.cmp(&b.backend));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const COOLDOWN: Duration = Duration::from_millis(30_000);

    #[test]
    fn unknown_backend_is_available() {
        let registry = HealthRegistry::new();
        assert!(registry.is_available("a", COOLDOWN));
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn marked_down_backend_is_unavailable_until_cooldown() {
        let registry = HealthRegistry::new();
        let t0 = Instant::now();
        registry.mark_down_at("a", t0);

        assert!(!registry.is_available_at("a", COOLDOWN, t0));
        assert!(!registry.is_available_at("a", COOLDOWN, t0 + COOLDOWN));
        assert!(registry.get("a").unwrap().is_down);

        assert!(registry.is_available_at("a", COOLDOWN, t0 + COOLDOWN + Duration::from_millis(1)));
        assert_eq!(registry.get("a"), Some(BackendHealth::healthy()));
    }

    #[test]
    fn cooldown_recovery_with_real_clock() {
        let registry = HealthRegistry::new();
        let cooldown = Duration::from_millis(20);
        registry.mark_down("a");
        assert!(!registry.is_available("a", cooldown));

        std::thread::sleep(Duration::from_millis(40));
        assert!(registry.is_available("a", cooldown));
        assert!(!registry.get("a").unwrap().is_down);
    }

    #[test]
    fn mark_down_refreshes_timestamp() {
        let registry = HealthRegistry::new();
        let t0 = Instant::now();
        registry.mark_down_at("a", t0);
        let t1 = t0 + Duration::from_secs(20);
        registry.mark_down_at("a", t1);

        // 31s after the first failure but only 11s after the second.
        assert!(!registry.is_available_at("a", COOLDOWN, t0 + Duration::from_secs(31)));
        assert_eq!(registry.get("a").unwrap().last_failure, Some(t1));
    }

    #[test]
    fn reset_all_clears_listed_backends() {
        let registry = HealthRegistry::new();
        registry.mark_down("a");
        registry.mark_down("b");
        registry.mark_down("c");

        registry.reset_all(&["a", "b"]);
        assert!(registry.is_available("a", COOLDOWN));
        assert!(registry.is_available("b", COOLDOWN));
        assert!(!registry.is_available("c", COOLDOWN));
    }

    #[test]
    fn snapshot_reports_down_entries() {
        let registry = HealthRegistry::new();
        registry.mark_down("b");
        registry.reset_all(&["a"]);

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].backend, "a");
        assert!(!snap[0].is_down);
        assert!(snap[0].down_for.is_none());
        assert_eq!(snap[1].backend, "b");
        assert!(snap[1].is_down);
        assert!(snap[1].down_for.is_some());
    }

    #[test]
    fn concurrent_access_is_safe() {
        let registry = Arc::new(HealthRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..500 {
                        let backend = format!("b{}", (i + j) % 3);
                        if j % 2 == 0 {
                            registry.mark_down_at(&backend, Instant::now());
                        } else {
                            registry.is_available(&backend, Duration::ZERO);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.snapshot().len() <= 3);
    }
}
