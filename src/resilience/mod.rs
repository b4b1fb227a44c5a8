//! Request resilience: classification, retries, circuit breaking,
//! adaptive throttling and strategy escalation.
//!
//! All per-origin mutable state lives in [`OriginHealth`], reached only
//! through the [`OriginRegistry`], which serializes mutations per origin.

mod challenge;
mod circuit;
mod escalation;
mod origin;
mod retry;
pub mod strategy_cache;
mod throttle;

pub use challenge::{ChallengeDetector, Classification};
pub use circuit::{Admission, CircuitBreaker, CircuitConfig, CircuitState};
pub use escalation::{Escalation, EscalationController};
pub use origin::{OriginHealth, OriginRegistry, OriginSlot, OriginSnapshot};
pub use retry::{GiveUpReason, RetryConfig, RetryDecision, RetryPolicy};
pub use throttle::{ThrottleConfig, ThrottleState};

use std::time::Duration;

/// Longest `Retry-After` we honor.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Parse a `Retry-After` header value (delta-seconds or HTTP date).
///
/// Capped at [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.signed_duration_since(chrono::Utc::now());
    Some(delta.to_std().unwrap_or(Duration::ZERO).min(MAX_RETRY_AFTER))
}

/// Network-level failure kinds as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// The attempt exceeded its wall-clock timeout.
    Timeout,
    /// Connection refused, reset or otherwise broken.
    Connection,
    /// Anything else (TLS, malformed response); not retried.
    Other,
}

/// One failed attempt, as presented to the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    Classified(Classification),
    Network(NetworkFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("3600")), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after(None), None);
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")),
            Some(Duration::ZERO)
        );
    }
}
