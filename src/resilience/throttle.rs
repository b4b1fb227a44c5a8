//! Adaptive per-origin request delay.
//!
//! The delay between requests to one origin rises when the origin is slow
//! or pushes back, and decays toward the floor after a run of fast,
//! failure-free responses. It never leaves `[min_delay, max_delay]`.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Politeness floor.
    pub min_delay: Duration,
    /// Progress guarantee.
    pub max_delay: Duration,
    /// Starting delay for a newly seen origin.
    pub base_delay: Duration,
    /// Rolling average latency above which the delay is raised.
    pub latency_threshold: Duration,
    /// Multiplier on slow responses, failures and rate limits.
    pub backoff_multiplier: f64,
    /// Multiplier applied when recovering.
    pub recovery_multiplier: f64,
    /// Consecutive good responses needed before each recovery step.
    pub recovery_threshold: u32,
    /// Latency samples kept for the rolling average.
    pub window: usize,
    /// Window in which repeated 403s on distinct URLs are counted.
    pub forbidden_window: Duration,
    /// Distinct URLs answering 403 within the window that count as rate limiting.
    pub forbidden_threshold: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            latency_threshold: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
            window: 10,
            forbidden_window: Duration::from_secs(60),
            forbidden_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    latency: Duration,
    success: bool,
}

/// Delay controller for one origin.
#[derive(Debug, Clone)]
pub struct ThrottleState {
    config: ThrottleConfig,
    current_delay: Duration,
    samples: VecDeque<Sample>,
    consecutive_successes: u32,
    /// Earliest instant the next request may be dispatched.
    next_slot: Option<Instant>,
    recent_403s: VecDeque<(Instant, String)>,
    in_backoff: bool,
    rate_limit_hits: u64,
}

impl ThrottleState {
    pub fn new(config: ThrottleConfig) -> Self {
        let ceiling = config.max_delay.max(config.min_delay);
        let current_delay = config.base_delay.clamp(config.min_delay, ceiling);
        Self {
            config,
            current_delay,
            samples: VecDeque::new(),
            consecutive_successes: 0,
            next_slot: None,
            recent_403s: VecDeque::new(),
            in_backoff: false,
            rate_limit_hits: 0,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn in_backoff(&self) -> bool {
        self.in_backoff
    }

    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit_hits
    }

    /// Rolling average latency over the sample window.
    pub fn average_latency(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().map(|s| s.latency).sum();
        Some(total / self.samples.len() as u32)
    }

    /// How long a request arriving at `now` must wait. Does not reserve a slot.
    pub fn delay_for(&self, now: Instant) -> Duration {
        match self.next_slot {
            Some(slot) => slot.saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Reserve the next dispatch slot and return how long to wait for it.
    ///
    /// Concurrent callers get successive slots spaced by the current delay.
    pub fn acquire(&mut self, now: Instant) -> Duration {
        let wait = self.delay_for(now);
        self.next_slot = Some(now + wait + self.current_delay);
        wait
    }

    /// Record the outcome of one request.
    pub fn record(&mut self, latency: Duration, success: bool) {
        self.samples.push_back(Sample { latency, success });
        while self.samples.len() > self.config.window.max(1) {
            self.samples.pop_front();
        }

        if !success {
            self.consecutive_successes = 0;
            self.raise(self.config.backoff_multiplier);
            debug!("Failure recorded, delay raised to {:?}", self.current_delay);
            return;
        }

        self.recent_403s.clear();
        self.consecutive_successes += 1;

        let slow = self
            .average_latency()
            .is_some_and(|avg| avg > self.config.latency_threshold);
        if slow {
            self.consecutive_successes = 0;
            self.raise(self.config.backoff_multiplier);
            debug!(
                "Average latency {:?} above threshold, delay raised to {:?}",
                self.average_latency().unwrap_or_default(),
                self.current_delay
            );
            return;
        }

        let clean_window = self.samples.iter().all(|s| s.success);
        if clean_window && self.consecutive_successes >= self.config.recovery_threshold {
            self.consecutive_successes = 0;
            let lowered = self.current_delay.mul_f64(self.config.recovery_multiplier);
            self.current_delay = self.clamp(lowered);
            if self.in_backoff && self.current_delay <= self.config.base_delay {
                self.in_backoff = false;
                info!("Recovered from backoff, delay now {:?}", self.current_delay);
            }
        }
    }

    /// Record an explicit rate limit; honors the server's `Retry-After` as a floor.
    pub fn record_rate_limited(&mut self, retry_after: Option<Duration>) {
        self.rate_limit_hits += 1;
        self.consecutive_successes = 0;
        self.recent_403s.clear();
        self.raise(self.config.backoff_multiplier);
        if let Some(hint) = retry_after {
            self.current_delay = self.clamp(self.current_delay.max(hint));
        }
        warn!("Rate limited, backing off to {:?}", self.current_delay);
    }

    /// Mild backoff for a server error.
    pub fn record_server_error(&mut self) {
        self.consecutive_successes = 0;
        self.raise(1.5);
    }

    /// Record a 403 on `url` at `now`.
    ///
    /// Returns true when distinct URLs answering 403 within the window reach
    /// the threshold, meaning the origin is rate limiting rather than
    /// denying one page. The delay is raised in that case.
    pub fn record_forbidden(&mut self, url: &str, now: Instant) -> bool {
        self.consecutive_successes = 0;
        while let Some((at, _)) = self.recent_403s.front() {
            if now.saturating_duration_since(*at) > self.config.forbidden_window {
                self.recent_403s.pop_front();
            } else {
                break;
            }
        }
        self.recent_403s.push_back((now, url.to_string()));

        let unique: HashSet<&str> = self.recent_403s.iter().map(|(_, u)| u.as_str()).collect();
        if unique.len() >= self.config.forbidden_threshold.max(1) {
            let count = unique.len();
            self.recent_403s.clear();
            self.record_rate_limited(None);
            warn!("{} distinct URLs got 403, treating as rate limiting", count);
            return true;
        }
        false
    }

    fn raise(&mut self, multiplier: f64) {
        self.in_backoff = true;
        let raised = self.current_delay.mul_f64(multiplier.max(1.0));
        self.current_delay = self.clamp(raised);
    }

    fn clamp(&self, delay: Duration) -> Duration {
        let max = self.config.max_delay.max(self.config.min_delay);
        delay.clamp(self.config.min_delay, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            base_delay: Duration::from_millis(200),
            latency_threshold: Duration::from_millis(500),
            recovery_threshold: 3,
            window: 4,
            ..Default::default()
        }
    }

    const FAST: Duration = Duration::from_millis(50);
    const SLOW: Duration = Duration::from_millis(1500);

    #[test]
    fn test_slow_responses_double_delay_up_to_max() {
        let mut t = ThrottleState::new(config());
        t.record(SLOW, true);
        assert_eq!(t.current_delay(), Duration::from_millis(400));
        for _ in 0..10 {
            t.record(SLOW, true);
        }
        assert_eq!(t.current_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_fast_clean_responses_decay_to_floor() {
        let mut t = ThrottleState::new(config());
        t.record(SLOW, true);
        t.record(SLOW, true);
        assert_eq!(t.current_delay(), Duration::from_millis(800));
        for _ in 0..200 {
            t.record(FAST, true);
        }
        assert_eq!(t.current_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_failure_in_window_blocks_decay() {
        let mut t = ThrottleState::new(config());
        t.record(FAST, false);
        let raised = t.current_delay();
        assert_eq!(raised, Duration::from_millis(400));
        t.record(FAST, true);
        t.record(FAST, true);
        t.record(FAST, true);
        // The failure is still inside the 4-sample window.
        assert_eq!(t.current_delay(), raised);
        t.record(FAST, true);
        t.record(FAST, true);
        t.record(FAST, true);
        assert!(t.current_delay() < raised);
    }

    #[test]
    fn test_delay_stays_in_bounds() {
        let mut t = ThrottleState::new(config());
        for i in 0..100 {
            match i % 3 {
                0 => t.record(SLOW, false),
                1 => t.record_rate_limited(Some(Duration::from_secs(30))),
                _ => t.record(FAST, true),
            }
            assert!(t.current_delay() >= Duration::from_millis(100));
            assert!(t.current_delay() <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_acquire_spaces_requests() {
        let mut t = ThrottleState::new(config());
        let now = Instant::now();
        assert_eq!(t.acquire(now), Duration::ZERO);
        assert_eq!(t.acquire(now), Duration::from_millis(200));
        assert_eq!(t.acquire(now), Duration::from_millis(400));
        assert_eq!(t.delay_for(now + Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_forbidden_pattern_detection() {
        let mut t = ThrottleState::new(config());
        let now = Instant::now();
        assert!(!t.record_forbidden("https://a.com/1", now));
        assert!(!t.record_forbidden("https://a.com/1", now));
        assert!(!t.record_forbidden("https://a.com/2", now));
        assert!(t.record_forbidden("https://a.com/3", now));
        assert_eq!(t.rate_limit_hits(), 1);
        assert!(t.in_backoff());
    }

    #[test]
    fn test_forbidden_window_expires() {
        let mut t = ThrottleState::new(config());
        let now = Instant::now();
        t.record_forbidden("https://a.com/1", now);
        t.record_forbidden("https://a.com/2", now);
        assert!(!t.record_forbidden("https://a.com/3", now + Duration::from_secs(61)));
    }
}
