//! Extraction results and validated article records.

use serde::{Deserialize, Serialize};

use super::Strategy;

/// Which extraction stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackLevel {
    /// Embedded schema.org / microdata / OpenGraph metadata.
    Structured,
    /// Readability-style content scoring.
    MlHeuristic,
    /// Generic structural selectors and raw text.
    CssHeuristic,
}

impl FallbackLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::MlHeuristic => "ml-heuristic",
            Self::CssHeuristic => "css-heuristic",
        }
    }
}

impl std::fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence bucket derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.9 {
            Self::High
        } else if score >= 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Candidate article fields produced by the extraction chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Canonical URL of the source document.
    pub url: String,
    pub headline: Option<String>,
    /// Cleaned plain-text body.
    pub body: Option<String>,
    pub author: Option<String>,
    /// Publication date as found in the page.
    pub published_at: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub fallback_level: FallbackLevel,
    /// Score in `0.0..=1.0`.
    pub confidence: f32,
}

impl ExtractionResult {
    /// An empty result at the given level.
    pub fn empty(url: impl Into<String>, level: FallbackLevel, confidence: f32) -> Self {
        Self {
            url: url.into(),
            headline: None,
            body: None,
            author: None,
            published_at: None,
            category: None,
            image_url: None,
            fallback_level: level,
            confidence,
        }
    }

    pub fn confidence_bucket(&self) -> Confidence {
        Confidence::from_score(self.confidence)
    }

    /// Fill any missing field from `other`, keeping fields already present.
    pub fn fill_from(&mut self, other: &ExtractionResult) {
        fn fill(slot: &mut Option<String>, other: &Option<String>) {
            if slot.as_deref().is_none_or(|s| s.trim().is_empty()) {
                if let Some(v) = other.as_ref().filter(|v| !v.trim().is_empty()) {
                    *slot = Some(v.clone());
                }
            }
        }
        fill(&mut self.headline, &other.headline);
        fill(&mut self.body, &other.body);
        fill(&mut self.author, &other.author);
        fill(&mut self.published_at, &other.published_at);
        fill(&mut self.category, &other.category);
        fill(&mut self.image_url, &other.image_url);
    }
}

/// A validated article, ready for the storage sink.
///
/// Built deterministically from an `ExtractionResult`: no timestamps or
/// random identifiers are assigned here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Unique key in the sink.
    pub canonical_url: String,
    pub paper_name: String,
    pub headline: String,
    pub body: String,
    pub author: Option<String>,
    /// RFC 3339 when parseable, otherwise the raw value.
    pub published_at: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    /// ISO 639-1 code, when detectable.
    pub detected_language: Option<String>,
    pub word_count: usize,
    pub reading_time_minutes: u32,
    /// Hex SHA-256 of the normalized body.
    pub content_hash: String,
    pub fallback_level: FallbackLevel,
    pub confidence: f32,
    /// Accepted in lenient mode despite failing the length check.
    pub low_confidence: bool,
    /// Rung that produced the document. Set by the crawler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<Strategy>,
}
