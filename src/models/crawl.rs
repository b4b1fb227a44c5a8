//! Crawl jobs as submitted by an orchestrator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Strategy;

/// Optional restrictions applied to an accepted article before persisting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Earliest publication date (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    /// Latest publication date (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    /// Accept only these categories (case-insensitive). Empty accepts all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// Accept only articles mentioning any of these keywords. Empty accepts all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl JobFilter {
    pub fn is_empty(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && self.categories.is_empty()
            && self.keywords.is_empty()
    }
}

/// A single page to acquire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJob {
    /// Origin identity, usually the site's host or paper key.
    pub origin: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "JobFilter::is_empty")]
    pub filter: JobFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_hint: Option<Strategy>,
}

impl CrawlJob {
    pub fn new(origin: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            url: url.into(),
            filter: JobFilter::default(),
            strategy_hint: None,
        }
    }

    pub fn with_filter(mut self, filter: JobFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_strategy_hint(mut self, strategy: Strategy) -> Self {
        self.strategy_hint = Some(strategy);
        self
    }

    /// Parse newline-delimited JSON jobs. Blank lines and `#` comments are skipped.
    ///
    /// Returns the 1-based line number and message of the first malformed line.
    pub fn parse_lines(input: &str) -> Result<Vec<CrawlJob>, (usize, String)> {
        let mut jobs = Vec::new();
        for (idx, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let job: CrawlJob =
                serde_json::from_str(line).map_err(|e| (idx + 1, e.to_string()))?;
            jobs.push(job);
        }
        Ok(jobs)
    }
}

/// The unit handed to the resilience layer for one attempt.
///
/// Recreated on each escalation with the stronger strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub origin: String,
    /// Canonical URL.
    pub url: String,
    pub strategy_hint: Strategy,
}

impl CrawlTarget {
    pub fn new(origin: impl Into<String>, url: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            origin: origin.into(),
            url: url.into(),
            strategy_hint: strategy,
        }
    }

    pub fn escalated(&self, strategy: Strategy) -> Self {
        Self {
            strategy_hint: strategy,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_lines_with_filters() {
        let input = r#"
# nightly run
{"origin": "prothomalo", "url": "https://www.prothomalo.com/bangladesh/abc"}
{"origin": "dailystar", "url": "https://www.thedailystar.net/news/x", "filter": {"date_from": "2024-01-01", "keywords": ["flood"]}, "strategy_hint": "stealth"}
"#;
        let jobs = CrawlJob::parse_lines(input).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].strategy_hint, None);
        assert!(jobs[0].filter.is_empty());
        assert_eq!(jobs[1].strategy_hint, Some(Strategy::Stealth));
        assert_eq!(
            jobs[1].filter.date_from,
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(jobs[1].filter.keywords, vec!["flood".to_string()]);
    }

    #[test]
    fn reports_malformed_line_number() {
        let input = "{\"origin\": \"a\", \"url\": \"https://a.com/x\"}\n{not json}\n";
        let err = CrawlJob::parse_lines(input).unwrap_err();
        assert_eq!(err.0, 2);
    }
}
