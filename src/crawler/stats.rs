//! Per-run statistics, grouped by origin.
//!
//! The fallback level histogram is the extraction health signal: a rising
//! share of css-heuristic results for one origin usually means its layout
//! changed and its configuration needs updating.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use super::{CrawlError, CrawlReport};
use crate::models::{FallbackLevel, Strategy};
use crate::resilience::{CircuitState, OriginSnapshot};
use crate::storage::PersistOutcome;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OriginStats {
    pub inserted: u64,
    pub duplicates: u64,
    /// Inserted articles whose body matched an already stored one.
    pub duplicate_content: u64,
    pub low_confidence: u64,
    pub rejected: BTreeMap<String, u64>,
    pub failures: BTreeMap<String, u64>,
    pub fallback_levels: BTreeMap<FallbackLevel, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned_strategy: Option<Strategy>,
}

impl OriginStats {
    /// Share of extractions that needed the selector or raw text stage.
    pub fn degraded_share(&self) -> f64 {
        let total: u64 = self.fallback_levels.values().sum();
        if total == 0 {
            return 0.0;
        }
        let degraded = self
            .fallback_levels
            .get(&FallbackLevel::CssHeuristic)
            .copied()
            .unwrap_or(0);
        degraded as f64 / total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlStats {
    pub origins: BTreeMap<String, OriginStats>,
}

impl CrawlStats {
    fn origin(&mut self, origin: &str) -> &mut OriginStats {
        self.origins.entry(origin.to_string()).or_default()
    }

    pub fn record_report(&mut self, report: &CrawlReport) {
        let stats = self.origin(&report.origin);
        *stats.fallback_levels.entry(report.fallback_level).or_default() += 1;
        match report.outcome {
            PersistOutcome::Inserted => stats.inserted += 1,
            PersistOutcome::DuplicateIgnored => stats.duplicates += 1,
        }
        if report.duplicate_content_of.is_some() {
            stats.duplicate_content += 1;
        }
        if report.low_confidence {
            stats.low_confidence += 1;
        }
    }

    pub fn record_error(&mut self, origin: &str, error: &CrawlError) {
        let stats = self.origin(origin);
        match error {
            CrawlError::Rejected {
                reason,
                fallback_level,
                ..
            } => {
                *stats.rejected.entry(reason.label().to_string()).or_default() += 1;
                *stats.fallback_levels.entry(*fallback_level).or_default() += 1;
            }
            other => *stats.failures.entry(other.label().to_string()).or_default() += 1,
        }
    }

    /// Attach the final circuit state and learned strategy of each origin.
    pub fn apply_snapshots(&mut self, snapshots: &[OriginSnapshot]) {
        for snap in snapshots {
            let stats = self.origin(&snap.origin);
            stats.circuit_state = Some(snap.circuit_state);
            stats.learned_strategy = snap.best_known_strategy;
        }
    }

    pub fn total_inserted(&self) -> u64 {
        self.origins.values().map(|s| s.inserted).sum()
    }

    pub fn total_duplicates(&self) -> u64 {
        self.origins.values().map(|s| s.duplicates).sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.origins
            .values()
            .flat_map(|s| s.rejected.values())
            .sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.origins
            .values()
            .flat_map(|s| s.failures.values())
            .sum()
    }

    pub fn log_summary(&self) {
        for (origin, s) in &self.origins {
            info!(
                "{}: {} inserted, {} duplicates, {} rejected, {} failed, circuit {}, strategy {}",
                origin,
                s.inserted,
                s.duplicates,
                s.rejected.values().sum::<u64>(),
                s.failures.values().sum::<u64>(),
                s.circuit_state.map_or("-", |c| c.as_str()),
                s.learned_strategy.map_or("-", |st| st.as_str()),
            );
            if s.degraded_share() > 0.5 {
                warn!(
                    "{}: {:.0}% of extractions fell back to generic selectors, layout may have changed",
                    origin,
                    s.degraded_share() * 100.0
                );
            }
        }
    }
}
