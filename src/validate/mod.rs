//! Quality gate between extraction and persistence.
//!
//! Checks run in a fixed order and the first failure wins. The gate is a
//! pure function of its inputs, so validating the same extraction twice
//! always gives the same verdict.

mod dates;
mod language;

pub use dates::{normalize_date, parse_date};
pub use language::{detect_language, same_language};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::extract::text::word_count;
use crate::models::{ArticleRecord, ExtractionResult, JobFilter};
use crate::utils::{canonicalize, content_hash};

/// Words per minute used for the reading time estimate.
const READING_WPM: usize = 200;

/// Substrings that mean script or markup leaked into the body.
const GARBAGE_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "document.write(",
    "function(",
    "<?php",
    "{{",
];

/// How the body length check treats short articles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Short bodies are rejected.
    #[default]
    Strict,
    /// Short bodies are accepted and flagged `low_confidence`.
    Lenient,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lenient" => Some(Self::Lenient),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub mode: ValidationMode,
    pub min_words: usize,
    pub min_headline_chars: usize,
    /// Ceiling on the share of non-text characters in the body.
    pub max_non_text_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Strict,
            min_words: 20,
            min_headline_chars: 5,
            max_non_text_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("missing headline")]
    MissingHeadline,
    #[error("headline too short ({chars} chars)")]
    HeadlineTooShort { chars: usize },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("empty article body")]
    EmptyBody,
    #[error("body too short ({words} words, minimum {min})")]
    BodyTooShort { words: usize, min: usize },
    #[error("language mismatch: expected {expected}, detected {detected}")]
    LanguageMismatch { expected: String, detected: String },
    #[error("garbage content (non-text ratio {ratio:.2})")]
    GarbageContent { ratio: f64 },
    #[error("filtered: {0}")]
    Filtered(String),
}

impl RejectReason {
    /// Stable key for counting rejections.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingHeadline => "missing_headline",
            Self::HeadlineTooShort { .. } => "headline_too_short",
            Self::InvalidUrl(_) => "invalid_url",
            Self::EmptyBody => "empty_body",
            Self::BodyTooShort { .. } => "body_too_short",
            Self::LanguageMismatch { .. } => "language_mismatch",
            Self::GarbageContent { .. } => "garbage_content",
            Self::Filtered(_) => "filtered",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept(ArticleRecord),
    Reject(RejectReason),
}

/// Outcome of the gate, always carrying the mode that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub mode: ValidationMode,
    pub decision: Decision,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self.decision, Decision::Accept(_))
    }

    pub fn into_result(self) -> Result<ArticleRecord, RejectReason> {
        match self.decision {
            Decision::Accept(record) => Ok(record),
            Decision::Reject(reason) => Err(reason),
        }
    }
}

/// Per-job inputs to the gate.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext<'a> {
    pub paper_name: &'a str,
    pub expected_language: Option<&'a str>,
    /// Overrides the configured minimum for this origin.
    pub min_words: Option<usize>,
    pub filter: Option<&'a JobFilter>,
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: ValidationConfig,
}

impl QualityGate {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn mode(&self) -> ValidationMode {
        self.config.mode
    }

    pub fn validate(&self, result: &ExtractionResult, ctx: &ValidationContext<'_>) -> Verdict {
        let decision = match self.check(result, ctx) {
            Ok(record) => Decision::Accept(record),
            Err(reason) => {
                debug!("Rejected {} ({} mode): {}", result.url, self.config.mode, reason);
                Decision::Reject(reason)
            }
        };
        Verdict {
            mode: self.config.mode,
            decision,
        }
    }

    fn check(
        &self,
        result: &ExtractionResult,
        ctx: &ValidationContext<'_>,
    ) -> Result<ArticleRecord, RejectReason> {
        let headline = result
            .headline
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(RejectReason::MissingHeadline)?;
        let headline_chars = headline.chars().count();
        if headline_chars < self.config.min_headline_chars {
            return Err(RejectReason::HeadlineTooShort {
                chars: headline_chars,
            });
        }

        let canonical_url =
            canonicalize(&result.url).map_err(|e| RejectReason::InvalidUrl(e.to_string()))?;

        let body = result
            .body
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(RejectReason::EmptyBody)?;
        let words = word_count(body);
        let min = ctx.min_words.unwrap_or(self.config.min_words);
        let low_confidence = words < min;
        if low_confidence && self.config.mode == ValidationMode::Strict {
            return Err(RejectReason::BodyTooShort { words, min });
        }

        let detected_language = detect_language(body);
        if let (Some(expected), Some(detected)) = (ctx.expected_language, detected_language) {
            if !same_language(expected, detected) {
                return Err(RejectReason::LanguageMismatch {
                    expected: expected.to_string(),
                    detected: detected.to_string(),
                });
            }
        }

        let ratio = non_text_ratio(body);
        if ratio > self.config.max_non_text_ratio || has_garbage_pattern(body) {
            return Err(RejectReason::GarbageContent { ratio });
        }

        let published_at = result.published_at.as_deref().map(normalize_date);
        if let Some(filter) = ctx.filter {
            apply_filter(filter, headline, body, published_at.as_deref(), result.category.as_deref())?;
        }

        Ok(ArticleRecord {
            canonical_url,
            paper_name: ctx.paper_name.to_string(),
            headline: headline.to_string(),
            body: body.to_string(),
            author: result.author.clone(),
            published_at,
            category: result.category.clone(),
            image_url: result.image_url.clone(),
            detected_language: detected_language.map(str::to_string),
            word_count: words,
            reading_time_minutes: reading_time(words),
            content_hash: content_hash(body),
            fallback_level: result.fallback_level,
            confidence: result.confidence,
            low_confidence,
            strategy_used: None,
        })
    }
}

/// Reading time in whole minutes, at least one.
pub fn reading_time(words: usize) -> u32 {
    u32::try_from(words.div_ceil(READING_WPM).max(1)).unwrap_or(u32::MAX)
}

fn is_text_char(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        // Indic vowel signs and viramas are marks, not letters.
        || matches!(c as u32, 0x0900..=0x0DFF)
        || c.is_ascii_punctuation()
        || matches!(c, '।' | '‘' | '’' | '“' | '”' | '–' | '—' | '…' | '৳' | '%')
}

/// Share of characters that are neither text, digits nor common punctuation.
pub fn non_text_ratio(body: &str) -> f64 {
    let total = body.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let odd = body.chars().filter(|c| !is_text_char(*c)).count();
    odd as f64 / total as f64
}

fn has_garbage_pattern(body: &str) -> bool {
    let lower = body.to_lowercase();
    GARBAGE_PATTERNS.iter().any(|p| lower.contains(p))
}

fn apply_filter(
    filter: &JobFilter,
    headline: &str,
    body: &str,
    published_at: Option<&str>,
    category: Option<&str>,
) -> Result<(), RejectReason> {
    // Undated articles cannot be placed outside the range, so they pass.
    if let Some(date) = published_at.and_then(parse_date).map(|dt| dt.date_naive()) {
        if filter.date_from.is_some_and(|from| date < from) {
            return Err(RejectReason::Filtered(format!("published {date} before range")));
        }
        if filter.date_to.is_some_and(|to| date > to) {
            return Err(RejectReason::Filtered(format!("published {date} after range")));
        }
    }

    if !filter.categories.is_empty() {
        let matches = category.is_some_and(|c| {
            filter
                .categories
                .iter()
                .any(|wanted| wanted.trim().eq_ignore_ascii_case(c.trim()))
        });
        if !matches {
            return Err(RejectReason::Filtered(format!(
                "category {} not selected",
                category.unwrap_or("(none)")
            )));
        }
    }

    if !filter.keywords.is_empty() {
        let haystack = format!("{headline}\n{body}").to_lowercase();
        if !filter
            .keywords
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()))
        {
            return Err(RejectReason::Filtered("no keyword matched".to_string()));
        }
    }
    Ok(())
}
