//! Retry policy with bounded exponential backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{AttemptFailure, Classification, NetworkFailure};

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Retry budget spent.
    Exhausted,
    /// Permanent failure (404, 410, other 4xx, non-transient network error).
    Permanent,
    /// Blocked by a challenge; escalation decides what happens next.
    Escalate,
    /// Nothing failed.
    NotAFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

/// Decides whether a failed attempt is retried and after how long.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what to do after the attempt numbered `attempt` (0 for the
    /// first try) failed with `failure`.
    ///
    /// At most `max_attempts` retries are granted, so a job makes at most
    /// `max_attempts + 1` attempts per strategy.
    pub fn should_retry(&self, attempt: u32, failure: &AttemptFailure) -> RetryDecision {
        let server_hint = match failure {
            AttemptFailure::Classified(Classification::Ok) => {
                return RetryDecision::GiveUp(GiveUpReason::NotAFailure)
            }
            AttemptFailure::Classified(Classification::Challenge { .. }) => {
                return RetryDecision::GiveUp(GiveUpReason::Escalate)
            }
            AttemptFailure::Classified(Classification::HardFail { status }) if *status < 500 => {
                return RetryDecision::GiveUp(GiveUpReason::Permanent)
            }
            AttemptFailure::Network(NetworkFailure::Other) => {
                return RetryDecision::GiveUp(GiveUpReason::Permanent)
            }
            AttemptFailure::Classified(Classification::RateLimited { retry_after }) => {
                *retry_after
            }
            AttemptFailure::Classified(Classification::HardFail { .. })
            | AttemptFailure::Network(_) => None,
        };

        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }

        let delay = self.jittered_delay(attempt);
        let delay = match server_hint {
            Some(hint) => delay.max(hint.min(self.config.max_delay)),
            None => delay,
        };
        RetryDecision::RetryAfter(delay)
    }

    /// Un-jittered backoff: `base * factor^attempt`, capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.config.factor.max(1.0);
        let exp = factor.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.config.base_delay.as_secs_f64() * exp;
        let cap = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.config.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Backoff with upward jitter, still capped at `max_delay`.
    ///
    /// Jitter never exceeds `factor - 1` of the delay, so the sequence stays
    /// non-decreasing across attempts.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let ratio = self
            .config
            .jitter
            .clamp(0.0, (self.config.factor - 1.0).max(0.0));
        if ratio == 0.0 || base.is_zero() {
            return base;
        }
        let multiplier = rand::rng().random_range(1.0..=1.0 + ratio);
        base.mul_f64(multiplier).min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(1),
            jitter: 0.5,
        })
    }

    fn server_error() -> AttemptFailure {
        AttemptFailure::Classified(Classification::HardFail { status: 502 })
    }

    #[test]
    fn test_retries_transient_failures() {
        let policy = policy();
        for failure in [
            server_error(),
            AttemptFailure::Classified(Classification::RateLimited { retry_after: None }),
            AttemptFailure::Network(NetworkFailure::Timeout),
            AttemptFailure::Network(NetworkFailure::Connection),
        ] {
            assert!(
                matches!(policy.should_retry(0, &failure), RetryDecision::RetryAfter(_)),
                "{failure:?} should be retried"
            );
        }
    }

    #[test]
    fn test_never_retries_challenge_or_permanent() {
        let policy = policy();
        assert_eq!(
            policy.should_retry(
                0,
                &AttemptFailure::Classified(Classification::Challenge {
                    signature: "captcha".into()
                })
            ),
            RetryDecision::GiveUp(GiveUpReason::Escalate)
        );
        for status in [404, 410, 403, 400] {
            assert_eq!(
                policy.should_retry(
                    0,
                    &AttemptFailure::Classified(Classification::HardFail { status })
                ),
                RetryDecision::GiveUp(GiveUpReason::Permanent)
            );
        }
        assert_eq!(
            policy.should_retry(0, &AttemptFailure::Network(NetworkFailure::Other)),
            RetryDecision::GiveUp(GiveUpReason::Permanent)
        );
    }

    #[test]
    fn test_bounded_attempts() {
        let policy = policy();
        let mut attempts = 1;
        let mut attempt = 0;
        while let RetryDecision::RetryAfter(_) = policy.should_retry(attempt, &server_error()) {
            attempts += 1;
            attempt += 1;
            assert!(attempts <= 10, "runaway retries");
        }
        assert_eq!(attempts, policy.config().max_attempts + 1);
        assert_eq!(
            policy.should_retry(attempt, &server_error()),
            RetryDecision::GiveUp(GiveUpReason::Exhausted)
        );
    }

    #[test]
    fn test_backoff_non_decreasing_and_capped() {
        let policy = policy();
        for _ in 0..50 {
            let mut previous = Duration::ZERO;
            for attempt in 0..12 {
                let delay = policy.jittered_delay(attempt);
                assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
                assert!(delay <= Duration::from_secs(1));
                previous = delay;
            }
        }
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_hint_raises_delay() {
        let policy = policy();
        let failure = AttemptFailure::Classified(Classification::RateLimited {
            retry_after: Some(Duration::from_millis(900)),
        });
        match policy.should_retry(0, &failure) {
            RetryDecision::RetryAfter(d) => assert!(d >= Duration::from_millis(900)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
