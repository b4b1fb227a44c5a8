//! Per-origin health state and the registry that owns it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::circuit::{Admission, CircuitBreaker, CircuitConfig, CircuitState};
use super::throttle::{ThrottleConfig, ThrottleState};
use crate::models::Strategy;

/// Health of one origin: circuit, throttle and learned strategy.
#[derive(Debug)]
pub struct OriginHealth {
    origin: String,
    circuit: CircuitBreaker,
    throttle: ThrottleState,
    best_known_strategy: Option<Strategy>,
}

impl OriginHealth {
    pub fn new(origin: impl Into<String>, circuit: CircuitConfig, throttle: ThrottleConfig) -> Self {
        Self {
            origin: origin.into(),
            circuit: CircuitBreaker::new(circuit),
            throttle: ThrottleState::new(throttle),
            best_known_strategy: None,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.circuit.consecutive_failures()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.circuit.opened_at()
    }

    pub fn current_delay(&self) -> Duration {
        self.throttle.current_delay()
    }

    pub fn best_known_strategy(&self) -> Option<Strategy> {
        self.best_known_strategy
    }

    /// Seed the learned strategy. Fallback rungs are ignored.
    pub fn set_best_known_strategy(&mut self, strategy: Strategy) {
        if strategy.is_live() {
            self.best_known_strategy = Some(strategy);
        }
    }

    /// Circuit admission check.
    pub fn admit(&mut self, now: Instant) -> Admission {
        let before = self.circuit.state();
        let admission = self.circuit.admit(now);
        if before == CircuitState::Open && self.circuit.state() == CircuitState::HalfOpen {
            info!("Circuit for {} half-open, probing", self.origin);
        }
        admission
    }

    /// Remaining cooldown when the circuit is open. Leaves the probe alone.
    pub fn open_for(&self, now: Instant) -> Option<Duration> {
        self.circuit.open_for(now)
    }

    /// Reserve a throttle slot; returns how long to wait before dispatch.
    pub fn reserve_slot(&mut self, now: Instant) -> Duration {
        self.throttle.acquire(now)
    }

    /// Current throttle wait without reserving a slot.
    pub fn delay_for(&self, now: Instant) -> Duration {
        self.throttle.delay_for(now)
    }

    /// A response with real content was obtained using `strategy`.
    ///
    /// Only live rungs are learned. An archive success says nothing about
    /// how to reach pages that have not been captured yet.
    pub fn record_success(&mut self, latency: Duration, strategy: Strategy) {
        self.throttle.record(latency, true);
        if self.circuit.record_success() {
            info!("Circuit for {} closed", self.origin);
        }
        if !strategy.is_live() {
            debug!("Not learning fallback strategy {} for {}", strategy, self.origin);
        } else if self.best_known_strategy != Some(strategy) {
            info!("Learned strategy {} for {}", strategy, self.origin);
            self.best_known_strategy = Some(strategy);
        }
    }

    /// The origin answered, but the answer was about the page rather than
    /// the origin (404, 410, other client errors).
    pub fn record_reachable(&mut self, latency: Duration) {
        self.throttle.record(latency, true);
        if self.circuit.record_success() {
            info!("Circuit for {} closed", self.origin);
        }
    }

    /// Blocked by a challenge. Slows down without counting against the
    /// circuit; a probe that got challenged is handed back.
    pub fn record_blocked(&mut self, latency: Duration, admission: Admission) {
        self.throttle.record(latency, false);
        self.release(admission);
    }

    /// Timeout, connection failure or server error.
    pub fn record_failure(&mut self, latency: Duration, server_error: bool, now: Instant) {
        if server_error {
            self.throttle.record_server_error();
        } else {
            self.throttle.record(latency, false);
        }
        self.trip_check(now);
    }

    /// Explicit rate limit (429, vendor header, or a 403 pattern).
    pub fn record_rate_limited(&mut self, retry_after: Option<Duration>, now: Instant) {
        self.throttle.record_rate_limited(retry_after);
        self.trip_check(now);
    }

    /// Record a bare 403. Returns true if the 403 pattern says rate limiting.
    pub fn record_forbidden(&mut self, url: &str, now: Instant) -> bool {
        let rate_limited = self.throttle.record_forbidden(url, now);
        if rate_limited {
            self.trip_check(now);
        } else if self.circuit.record_success() {
            info!("Circuit for {} closed", self.origin);
        }
        rate_limited
    }

    /// Give back the half-open probe if `admission` was the one holding it.
    /// Requests admitted as `Allowed` never touch another job's probe.
    pub fn release(&mut self, admission: Admission) {
        if admission == Admission::Probe {
            self.circuit.release_probe();
        }
    }

    pub fn snapshot(&self) -> OriginSnapshot {
        OriginSnapshot {
            origin: self.origin.clone(),
            circuit_state: self.circuit.state(),
            consecutive_failures: self.circuit.consecutive_failures(),
            current_delay: self.throttle.current_delay(),
            best_known_strategy: self.best_known_strategy,
            rate_limit_hits: self.throttle.rate_limit_hits(),
        }
    }

    fn trip_check(&mut self, now: Instant) {
        if self.circuit.record_failure(now) {
            warn!(
                "Circuit for {} opened after {} consecutive failures",
                self.origin,
                self.circuit.consecutive_failures()
            );
        }
    }
}

/// Point-in-time view of an origin, for reporting and the strategy cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginSnapshot {
    pub origin: String,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub current_delay: Duration,
    pub best_known_strategy: Option<Strategy>,
    pub rate_limit_hits: u64,
}

/// One origin's serialized state plus its concurrency permits.
#[derive(Debug)]
pub struct OriginSlot {
    health: Mutex<OriginHealth>,
    permits: Arc<Semaphore>,
}

impl OriginSlot {
    /// Lock this origin's health. All mutations go through this guard.
    pub async fn health(&self) -> MutexGuard<'_, OriginHealth> {
        self.health.lock().await
    }

    /// Wait for one of this origin's concurrency permits.
    pub async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }
}

/// Concurrent map of origins; discovery is shared, each origin has a single writer.
#[derive(Debug)]
pub struct OriginRegistry {
    circuit: CircuitConfig,
    throttle: ThrottleConfig,
    per_origin_limit: usize,
    origins: RwLock<HashMap<String, Arc<OriginSlot>>>,
}

impl OriginRegistry {
    pub fn new(circuit: CircuitConfig, throttle: ThrottleConfig, per_origin_limit: usize) -> Self {
        Self {
            circuit,
            throttle,
            per_origin_limit: per_origin_limit.max(1),
            origins: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the slot for `origin`.
    ///
    /// `limit` overrides the per-origin concurrency cap when the slot is created.
    pub async fn slot(&self, origin: &str, limit: Option<usize>) -> Arc<OriginSlot> {
        if let Some(slot) = self.origins.read().await.get(origin) {
            return slot.clone();
        }
        let mut origins = self.origins.write().await;
        origins
            .entry(origin.to_string())
            .or_insert_with(|| {
                let permits = limit.unwrap_or(self.per_origin_limit).max(1);
                Arc::new(OriginSlot {
                    health: Mutex::new(OriginHealth::new(
                        origin,
                        self.circuit.clone(),
                        self.throttle.clone(),
                    )),
                    permits: Arc::new(Semaphore::new(permits)),
                })
            })
            .clone()
    }

    /// Seed an origin's learned strategy (warm start).
    pub async fn seed_strategy(&self, origin: &str, strategy: Strategy) {
        let slot = self.slot(origin, None).await;
        slot.health().await.set_best_known_strategy(strategy);
    }

    pub async fn snapshot(&self, origin: &str) -> Option<OriginSnapshot> {
        let slot = self.origins.read().await.get(origin).cloned()?;
        let health = slot.health().await;
        Some(health.snapshot())
    }

    /// Snapshots of every known origin, sorted by origin.
    pub async fn snapshots(&self) -> Vec<OriginSnapshot> {
        let slots: Vec<Arc<OriginSlot>> = self.origins.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.health().await.snapshot());
        }
        out.sort_by(|a, b| a.origin.cmp(&b.origin));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> OriginRegistry {
        OriginRegistry::new(
            CircuitConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(60),
            },
            ThrottleConfig::default(),
            2,
        )
    }

    #[tokio::test]
    async fn test_slot_is_shared_per_origin() {
        let reg = registry();
        let a1 = reg.slot("a.com", None).await;
        let a2 = reg.slot("a.com", None).await;
        let b = reg.slot("b.com", None).await;
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let reg = Arc::new(OriginRegistry::new(
            CircuitConfig {
                failure_threshold: 1000,
                cooldown: Duration::from_secs(60),
            },
            ThrottleConfig::default(),
            2,
        ));
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                let slot = reg.slot("x.com", None).await;
                let mut health = slot.health().await;
                health.record_failure(Duration::from_millis(10), false, Instant::now());
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let snap = reg.snapshot("x.com").await.unwrap();
        assert_eq!(snap.consecutive_failures, 50);
    }

    #[tokio::test]
    async fn test_per_origin_permits() {
        let reg = registry();
        let slot = reg.slot("a.com", Some(1)).await;
        let permit = slot.acquire_permit().await.unwrap();
        assert!(slot.permits.clone().try_acquire_owned().is_err());
        drop(permit);
        assert!(slot.permits.clone().try_acquire_owned().is_ok());
    }

    #[tokio::test]
    async fn test_success_learns_strategy_and_closes_circuit() {
        let reg = registry();
        let slot = reg.slot("a.com", None).await;
        {
            let mut h = slot.health().await;
            let now = Instant::now();
            for _ in 0..3 {
                h.record_failure(Duration::from_millis(5), false, now);
            }
            assert_eq!(h.circuit_state(), CircuitState::Open);
            assert!(matches!(
                h.admit(now + Duration::from_secs(61)),
                Admission::Probe
            ));
            h.record_success(Duration::from_millis(5), Strategy::Stealth);
            assert_eq!(h.circuit_state(), CircuitState::Closed);
        }
        let snap = reg.snapshot("a.com").await.unwrap();
        assert_eq!(snap.best_known_strategy, Some(Strategy::Stealth));
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_archive_success_is_not_learned() {
        let reg = registry();
        let slot = reg.slot("a.com", None).await;
        let mut h = slot.health().await;
        h.record_success(Duration::from_millis(5), Strategy::Archive);
        assert_eq!(h.best_known_strategy(), None);
        h.record_success(Duration::from_millis(5), Strategy::Stealth);
        h.record_success(Duration::from_millis(5), Strategy::Archive);
        assert_eq!(h.best_known_strategy(), Some(Strategy::Stealth));
        h.set_best_known_strategy(Strategy::Archive);
        assert_eq!(h.best_known_strategy(), Some(Strategy::Stealth));
    }

    #[tokio::test]
    async fn test_only_probe_holder_releases_probe() {
        let reg = registry();
        let slot = reg.slot("a.com", None).await;
        let mut h = slot.health().await;
        let start = Instant::now();
        for _ in 0..3 {
            h.record_failure(Duration::from_millis(5), false, start);
        }
        let later = start + Duration::from_secs(61);
        assert_eq!(h.admit(later), Admission::Probe);

        // A request admitted before the trip gets challenged or cancelled.
        h.record_blocked(Duration::from_millis(5), Admission::Allowed);
        h.release(Admission::Allowed);
        assert!(matches!(h.admit(later), Admission::Rejected { .. }));

        h.release(Admission::Probe);
        assert_eq!(h.admit(later), Admission::Probe);
    }

    #[tokio::test]
    async fn test_seed_strategy() {
        let reg = registry();
        reg.seed_strategy("a.com", Strategy::Browser).await;
        let snaps = reg.snapshots().await;
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].best_known_strategy, Some(Strategy::Browser));
    }
}
