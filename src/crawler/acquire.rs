//! The resilient fetch loop: circuit, throttle, retry and escalation
//! wrapped around one dispatch per attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CancelSignal, CrawlError, Crawler};
use crate::config::OriginConfig;
use crate::fetch::FetchError;
use crate::models::{CrawlTarget, FetchOutcome, RawPage, StatusClass, Strategy};
use crate::resilience::{
    Admission, AttemptFailure, Classification, Escalation, GiveUpReason, OriginSlot,
    RetryDecision,
};

/// A document obtained with real content.
#[derive(Debug)]
pub(crate) struct Acquired {
    pub outcome: FetchOutcome,
    /// Dispatches made across all rungs.
    pub attempts: u32,
}

/// One dispatch and the circuit admission it ran under.
struct Dispatched {
    result: Result<RawPage, FetchError>,
    latency: Duration,
    admission: Admission,
}

/// What to do after an attempt.
enum Next {
    Done(RawPage),
    Escalate(String),
    Policy(AttemptFailure),
}

impl Crawler {
    /// Acquire the document for `target`, escalating and retrying as needed.
    ///
    /// One retry budget covers the whole job: at most `max_attempts + 1`
    /// dispatches across every rung, and escalating does not refund it.
    /// Network and blocking failures never escape except as a terminal
    /// error once the budget or the ladder is spent.
    pub(crate) async fn acquire(
        &self,
        mut target: CrawlTarget,
        origin_cfg: &OriginConfig,
        cancel: &CancelSignal,
    ) -> Result<Acquired, CrawlError> {
        let slot = self
            .registry
            .slot(&target.origin, origin_cfg.max_concurrency)
            .await;
        let budget = self.retry.config().max_attempts.saturating_add(1);
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            // Fail fast without queueing; the binding check happens right
            // before dispatch.
            if let Some(retry_in) = slot.health().await.open_for(Instant::now()) {
                debug!("Circuit open for {}, skipping {}", target.origin, target.url);
                return Err(CrawlError::CircuitOpen {
                    origin: target.origin.clone(),
                    retry_in,
                });
            }

            let strategy = target.strategy_hint;
            let Dispatched {
                result,
                latency,
                admission,
            } = self.attempt(&slot, &target, cancel).await?;
            attempts += 1;

            let next = self
                .observe(&slot, &target, origin_cfg, result, latency, admission)
                .await;

            let failure = match next {
                Next::Done(page) => {
                    let outcome = FetchOutcome {
                        status_class: StatusClass::Success,
                        http_status: Some(page.status),
                        body: page.body,
                        elapsed_latency: latency,
                        strategy_used: strategy,
                        final_url: page.final_url,
                    };
                    return Ok(Acquired { outcome, attempts });
                }
                Next::Escalate(why) => {
                    debug!("{} unavailable via {}: {}", target.url, strategy, why);
                    target = self.escalate(&target, strategy)?;
                    self.check_budget(&target, attempts, budget, why)?;
                    continue;
                }
                Next::Policy(failure) => failure,
            };

            match self.retry.should_retry(attempts - 1, &failure) {
                RetryDecision::RetryAfter(delay) => {
                    info!(
                        "Retrying {} via {} in {:?} (attempt {}/{})",
                        target.url,
                        strategy,
                        delay,
                        attempts + 1,
                        budget
                    );
                    if !cancel.sleep(delay).await {
                        return Err(CrawlError::Cancelled);
                    }
                }
                RetryDecision::GiveUp(GiveUpReason::Escalate) => {
                    target = self.escalate(&target, strategy)?;
                    self.check_budget(&target, attempts, budget, describe(&failure))?;
                }
                RetryDecision::GiveUp(GiveUpReason::Exhausted) => {
                    warn!(
                        "Giving up on {} after {} attempts via {}",
                        target.url, attempts, strategy
                    );
                    return Err(CrawlError::RetriesExhausted {
                        url: target.url.clone(),
                        attempts,
                        last: describe(&failure),
                    });
                }
                RetryDecision::GiveUp(GiveUpReason::Permanent | GiveUpReason::NotAFailure) => {
                    let status = match failure {
                        AttemptFailure::Classified(Classification::HardFail { status }) => {
                            Some(status)
                        }
                        _ => None,
                    };
                    warn!("Permanent failure for {}: {}", target.url, describe(&failure));
                    return Err(CrawlError::Permanent {
                        url: target.url.clone(),
                        status,
                    });
                }
            }
        }
    }

    fn escalate(&self, target: &CrawlTarget, current: Strategy) -> Result<CrawlTarget, CrawlError> {
        match self.escalation.next_strategy(&target.origin, current) {
            Escalation::Next(next) => Ok(target.escalated(next)),
            Escalation::Exhausted => Err(CrawlError::EscalationExhausted {
                url: target.url.clone(),
                last: current,
            }),
        }
    }

    /// Stop before a dispatch the job's retry budget does not cover.
    fn check_budget(
        &self,
        target: &CrawlTarget,
        attempts: u32,
        budget: u32,
        last: String,
    ) -> Result<(), CrawlError> {
        if attempts < budget {
            return Ok(());
        }
        warn!(
            "Retry budget spent for {} before trying {}",
            target.url, target.strategy_hint
        );
        Err(CrawlError::RetriesExhausted {
            url: target.url.clone(),
            attempts,
            last,
        })
    }

    /// One dispatch behind the origin permit, throttle slot and global permit.
    ///
    /// The circuit is consulted under the origin lock only after every wait,
    /// so a circuit that opened while this job was queued stops it here.
    async fn attempt(
        &self,
        slot: &Arc<OriginSlot>,
        target: &CrawlTarget,
        cancel: &CancelSignal,
    ) -> Result<Dispatched, CrawlError> {
        let Some(_origin_permit) = slot.acquire_permit().await else {
            return Err(CrawlError::Cancelled);
        };

        let wait = slot.health().await.reserve_slot(Instant::now());
        if !wait.is_zero() {
            debug!("Throttling {} for {:?}", target.origin, wait);
        }
        if !cancel.sleep(wait).await {
            return Err(CrawlError::Cancelled);
        }

        let Ok(_global_permit) = self.global.clone().acquire_owned().await else {
            return Err(CrawlError::Cancelled);
        };
        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }

        let admission = slot.health().await.admit(Instant::now());
        if let Admission::Rejected { retry_in } = admission {
            debug!(
                "Circuit for {} opened while {} was queued",
                target.origin, target.url
            );
            return Err(CrawlError::CircuitOpen {
                origin: target.origin.clone(),
                retry_in,
            });
        }

        let timeout = match target.strategy_hint {
            Strategy::Browser => self.browser_timeout,
            _ => self.request_timeout,
        };
        let started = Instant::now();
        let result = tokio::select! {
            r = tokio::time::timeout(
                timeout,
                self.fetchers.dispatch(target.strategy_hint, &target.url),
            ) => r.unwrap_or(Err(FetchError::Timeout)),
            _ = cancel.cancelled() => {
                slot.health().await.release(admission);
                return Err(CrawlError::Cancelled);
            }
        };
        Ok(Dispatched {
            result,
            latency: started.elapsed(),
            admission,
        })
    }

    /// Classify the attempt and record it against the origin's health.
    async fn observe(
        &self,
        slot: &Arc<OriginSlot>,
        target: &CrawlTarget,
        origin_cfg: &OriginConfig,
        result: Result<RawPage, FetchError>,
        latency: Duration,
        admission: Admission,
    ) -> Next {
        let strategy = target.strategy_hint;
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                let mut health = slot.health().await;
                return match e.network_failure() {
                    Some(kind) => {
                        debug!("{} via {} failed: {}", target.url, strategy, e);
                        health.record_failure(latency, false, Instant::now());
                        Next::Policy(AttemptFailure::Network(kind))
                    }
                    None => {
                        health.release(admission);
                        Next::Escalate(e.to_string())
                    }
                };
            }
        };

        let classification = self.detector.classify(
            page.status,
            &page.body,
            &page.headers,
            &origin_cfg.challenge_patterns,
        );

        let mut health = slot.health().await;
        let now = Instant::now();
        match classification {
            Classification::Ok => {
                health.record_success(latency, strategy);
                Next::Done(page)
            }
            Classification::Challenge { ref signature } => {
                info!(
                    "Challenge on {} via {} ({})",
                    target.url, strategy, signature
                );
                health.record_blocked(latency, admission);
                Next::Policy(AttemptFailure::Classified(classification))
            }
            Classification::RateLimited { retry_after } => {
                health.record_rate_limited(retry_after, now);
                Next::Policy(AttemptFailure::Classified(classification))
            }
            Classification::HardFail { status } if status >= 500 => {
                health.record_failure(latency, true, now);
                Next::Policy(AttemptFailure::Classified(classification))
            }
            Classification::HardFail { status: 403 } => {
                // No fingerprint and no rate-limit header: look at how many
                // distinct URLs this origin has refused recently.
                if health.record_forbidden(&target.url, now) {
                    info!(
                        "Repeated 403s from {}, treating as rate limiting",
                        target.origin
                    );
                    Next::Policy(AttemptFailure::Classified(Classification::RateLimited {
                        retry_after: None,
                    }))
                } else {
                    Next::Policy(AttemptFailure::Classified(classification))
                }
            }
            Classification::HardFail { .. } => {
                health.record_reachable(latency);
                Next::Policy(AttemptFailure::Classified(classification))
            }
        }
    }
}

fn describe(failure: &AttemptFailure) -> String {
    match failure {
        AttemptFailure::Classified(Classification::HardFail { status }) => {
            format!("HTTP {}", status)
        }
        AttemptFailure::Classified(c) => c.label().to_string(),
        AttemptFailure::Network(kind) => format!("{:?}", kind).to_lowercase(),
    }
}
