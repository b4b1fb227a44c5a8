//! Crawl pipeline: job intake, resilient acquisition, extraction,
//! validation and persistence.
//!
//! Only acquisition touches shared state. Extraction and validation are
//! pure per-document steps and run without any lock held.

mod acquire;
mod cancel;
mod stats;

pub use cancel::{CancelHandle, CancelSignal};
pub use stats::{CrawlStats, OriginStats};

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use crate::config::{OriginConfigStore, Settings};
use crate::extract::ExtractionChain;
use crate::fetch::StrategyTable;
use crate::models::{CrawlJob, CrawlTarget, FallbackLevel, Strategy};
use crate::resilience::{ChallengeDetector, EscalationController, OriginRegistry, RetryPolicy};
use crate::storage::{ArticleSink, PersistOutcome, StorageError};
use crate::utils::canonicalize;
use crate::validate::{Decision, QualityGate, RejectReason, ValidationContext, ValidationMode};

/// Terminal outcome of a job that did not produce a stored record.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("circuit open for {origin} (retry in {retry_in:?})")]
    CircuitOpen { origin: String, retry_in: Duration },
    #[error("permanent failure for {url}{}", http_suffix(.status))]
    Permanent { url: String, status: Option<u16> },
    #[error("retries exhausted for {url} after {attempts} attempts ({last})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("escalation exhausted for {url} at {last}")]
    EscalationExhausted { url: String, last: Strategy },
    #[error("cancelled")]
    Cancelled,
    #[error("rejected {url} ({mode} mode): {reason}")]
    Rejected {
        url: String,
        reason: RejectReason,
        mode: ValidationMode,
        fallback_level: FallbackLevel,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl CrawlError {
    /// Stable key for statistics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidJob(_) => "invalid_job",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Permanent { .. } => "permanent",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::EscalationExhausted { .. } => "escalation_exhausted",
            Self::Cancelled => "cancelled",
            Self::Rejected { .. } => "rejected",
            Self::Storage(_) => "storage",
        }
    }
}

/// A job that reached the storage sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlReport {
    pub origin: String,
    pub canonical_url: String,
    pub outcome: PersistOutcome,
    pub strategy: Strategy,
    /// Attempts across all rungs.
    pub attempts: u32,
    pub fallback_level: FallbackLevel,
    pub confidence: f32,
    pub low_confidence: bool,
    pub validation_mode: ValidationMode,
    /// Canonical URL of a stored article with the same body, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_content_of: Option<String>,
}

/// Result of one job within a run.
#[derive(Debug)]
pub struct JobResult {
    pub job: CrawlJob,
    pub result: Result<CrawlReport, CrawlError>,
}

pub struct Crawler {
    fetchers: StrategyTable,
    escalation: EscalationController,
    registry: Arc<OriginRegistry>,
    origins: Arc<OriginConfigStore>,
    detector: ChallengeDetector,
    retry: RetryPolicy,
    extraction: ExtractionChain,
    gate: QualityGate,
    sink: Arc<dyn ArticleSink>,
    global: Arc<Semaphore>,
    concurrency: usize,
    request_timeout: Duration,
    browser_timeout: Duration,
    stats: Mutex<CrawlStats>,
}

impl Crawler {
    pub fn new(settings: &Settings, fetchers: StrategyTable, sink: Arc<dyn ArticleSink>) -> Self {
        let concurrency = settings.concurrency.max(1);
        Self {
            escalation: EscalationController::new(fetchers.available()),
            fetchers,
            registry: Arc::new(OriginRegistry::new(
                settings.circuit.clone(),
                settings.throttle.clone(),
                settings.per_origin_concurrency,
            )),
            origins: Arc::new(OriginConfigStore::new(settings.origins.clone())),
            detector: ChallengeDetector::new(),
            retry: RetryPolicy::new(settings.retry.clone()),
            extraction: ExtractionChain::new(settings.extraction.clone()),
            gate: QualityGate::new(settings.validation.clone()),
            sink,
            global: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            request_timeout: settings.request_timeout,
            browser_timeout: settings.browser_timeout,
            stats: Mutex::new(CrawlStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<OriginRegistry> {
        &self.registry
    }

    /// Per-origin configuration, replaceable while the crawler runs.
    pub fn origin_configs(&self) -> &Arc<OriginConfigStore> {
        &self.origins
    }

    pub fn validation_mode(&self) -> ValidationMode {
        self.gate.mode()
    }

    /// Check a job before any network activity.
    pub fn check_job(job: &CrawlJob) -> Result<String, CrawlError> {
        if job.origin.trim().is_empty() {
            return Err(CrawlError::InvalidJob(format!("{}: missing origin", job.url)));
        }
        canonicalize(&job.url).map_err(|e| CrawlError::InvalidJob(format!("{}: {}", job.url, e)))
    }

    /// Run one job end to end.
    pub async fn crawl(
        &self,
        job: &CrawlJob,
        cancel: &CancelSignal,
    ) -> Result<CrawlReport, CrawlError> {
        let result = self.crawl_inner(job, cancel).await;
        let mut stats = self.stats.lock().await;
        match &result {
            Ok(report) => stats.record_report(report),
            Err(e) => stats.record_error(&job.origin, e),
        }
        result
    }

    async fn crawl_inner(
        &self,
        job: &CrawlJob,
        cancel: &CancelSignal,
    ) -> Result<CrawlReport, CrawlError> {
        let canonical_url = Self::check_job(job)?;
        let origin_cfg = self.origins.get(&job.origin).await;

        let best_known = self
            .registry
            .slot(&job.origin, origin_cfg.max_concurrency)
            .await
            .health()
            .await
            .best_known_strategy();
        let hint = job.strategy_hint.max(origin_cfg.start_strategy);
        let start = self
            .escalation
            .starting_strategy(hint, best_known)
            .ok_or_else(|| CrawlError::EscalationExhausted {
                url: canonical_url.clone(),
                last: hint.unwrap_or(Strategy::Plain),
            })?;

        let target = CrawlTarget::new(job.origin.clone(), canonical_url.clone(), start);
        let acquired = self.acquire(target, &origin_cfg, cancel).await?;
        let strategy = acquired.outcome.strategy_used;
        debug!(
            "Fetched {} via {} in {:?} ({} attempts)",
            canonical_url, strategy, acquired.outcome.elapsed_latency, acquired.attempts
        );

        let extraction = self.extraction.extract_with_hints(
            &canonical_url,
            &acquired.outcome.body,
            &origin_cfg.hints(),
        );

        let filter = (!job.filter.is_empty()).then_some(&job.filter);
        let ctx = ValidationContext {
            paper_name: &origin_cfg.paper_name,
            expected_language: origin_cfg.expected_language.as_deref(),
            min_words: origin_cfg.min_words,
            filter,
        };
        let verdict = self.gate.validate(&extraction, &ctx);
        let mut record = match verdict.decision {
            Decision::Accept(record) => record,
            Decision::Reject(reason) => {
                return Err(CrawlError::Rejected {
                    url: canonical_url,
                    reason,
                    mode: verdict.mode,
                    fallback_level: extraction.fallback_level,
                })
            }
        };
        record.strategy_used = Some(strategy);

        let duplicate_content_of = self
            .sink
            .find_by_content_hash(&record.content_hash)
            .await?
            .filter(|url| *url != record.canonical_url);
        if let Some(ref other) = duplicate_content_of {
            info!("{} has the same content as {}", record.canonical_url, other);
        }

        let outcome = self.sink.persist(&record).await?;
        if outcome == PersistOutcome::DuplicateIgnored {
            info!("Duplicate URL ignored: {}", record.canonical_url);
        }

        Ok(CrawlReport {
            origin: job.origin.clone(),
            canonical_url: record.canonical_url,
            outcome,
            strategy,
            attempts: acquired.attempts,
            fallback_level: record.fallback_level,
            confidence: record.confidence,
            low_confidence: record.low_confidence,
            validation_mode: verdict.mode,
            duplicate_content_of,
        })
    }

    /// Run many jobs concurrently.
    ///
    /// Every job is checked first; a malformed job fails the whole run
    /// before any request is sent. After that, no single job's failure
    /// stops the others.
    pub async fn run(
        &self,
        jobs: Vec<CrawlJob>,
        cancel: &CancelSignal,
        on_done: impl Fn(&JobResult),
    ) -> Result<Vec<JobResult>, CrawlError> {
        for job in &jobs {
            Self::check_job(job)?;
        }
        info!(
            "Crawling {} jobs with concurrency {} ({} validation)",
            jobs.len(),
            self.concurrency,
            self.gate.mode()
        );

        let mut results = Vec::with_capacity(jobs.len());
        let mut pending = stream::iter(jobs)
            .map(|job| {
                let cancel = cancel.clone();
                async move {
                    let result = self.crawl(&job, &cancel).await;
                    JobResult { job, result }
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some(done) = pending.next().await {
            on_done(&done);
            results.push(done);
        }
        Ok(results)
    }

    /// Statistics so far, with each origin's current circuit and strategy.
    pub async fn stats(&self) -> CrawlStats {
        let mut stats = self.stats.lock().await.clone();
        stats.apply_snapshots(&self.registry.snapshots().await);
        stats
    }
}
