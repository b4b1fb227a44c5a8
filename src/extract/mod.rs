//! Extraction chain: structured metadata, then readability scoring, then
//! generic selectors, then raw text.
//!
//! Every stage works on the same parsed document. A later stage only runs
//! when the merged result so far is missing a headline or has a body below
//! the length floor, and the result is tagged with the last stage that ran.

mod heuristic;
mod readability;
mod structured;
pub mod text;

use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ExtractionResult, FallbackLevel};

pub(crate) const STRUCTURED_CONFIDENCE: f32 = 0.95;
pub(crate) const ML_HEURISTIC_CONFIDENCE: f32 = 0.80;
pub(crate) const CSS_HEURISTIC_CONFIDENCE: f32 = 0.60;
pub(crate) const RAW_TEXT_CONFIDENCE: f32 = 0.30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Bodies shorter than this count as incomplete.
    pub min_body_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { min_body_chars: 50 }
    }
}

/// Origin-specific selectors tried before the generic ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionHints {
    pub headline_selectors: Vec<String>,
    pub body_selectors: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Readability,
    Selectors,
    RawText,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionChain {
    config: ExtractionConfig,
}

impl ExtractionChain {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, url: &str, html: &str) -> ExtractionResult {
        self.extract_with_hints(url, html, &ExtractionHints::default())
    }

    /// Run the chain. Never fails; degrades confidence instead.
    pub fn extract_with_hints(
        &self,
        url: &str,
        html: &str,
        hints: &ExtractionHints,
    ) -> ExtractionResult {
        let doc = Html::parse_document(html);

        let mut merged = structured::extract(&doc, url);
        let mut last = (merged.fallback_level, merged.confidence);

        for stage in [Stage::Readability, Stage::Selectors, Stage::RawText] {
            if self.is_complete(&merged) {
                break;
            }
            let next = match stage {
                Stage::Readability => readability::extract(&doc, url),
                Stage::Selectors => heuristic::extract(&doc, url, hints),
                Stage::RawText => heuristic::raw_text(&doc, url),
            };
            last = (next.fallback_level, next.confidence);
            self.merge(&mut merged, &next);
        }

        merged.fallback_level = last.0;
        merged.confidence = last.1;
        finish(&mut merged);
        debug!(
            "Extracted {} at {} (confidence {:.2})",
            url, merged.fallback_level, merged.confidence
        );
        merged
    }

    fn body_len(result: &ExtractionResult) -> usize {
        result.body.as_deref().map_or(0, |b| b.trim().chars().count())
    }

    fn is_complete(&self, result: &ExtractionResult) -> bool {
        let has_headline = result
            .headline
            .as_deref()
            .is_some_and(|h| !h.trim().is_empty());
        has_headline && Self::body_len(result) >= self.config.min_body_chars
    }

    /// Earlier fields win, except a short body loses to a longer one.
    fn merge(&self, merged: &mut ExtractionResult, next: &ExtractionResult) {
        let current = Self::body_len(merged);
        if current < self.config.min_body_chars && Self::body_len(next) > current {
            merged.body = next.body.clone();
        }
        merged.fill_from(next);
    }
}

fn finish(result: &mut ExtractionResult) {
    fn tidy(slot: &mut Option<String>, f: impl Fn(&str) -> String) {
        *slot = slot.as_deref().map(f).filter(|s| !s.is_empty());
    }
    tidy(&mut result.headline, |s| text::normalize_whitespace(&text::decode_entities(s)));
    tidy(&mut result.body, text::clean_body);
    tidy(&mut result.author, text::normalize_whitespace);
    tidy(&mut result.published_at, |s| s.trim().to_string());
    tidy(&mut result.category, text::normalize_whitespace);
    tidy(&mut result.image_url, |s| s.trim().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_structured_document_is_high_confidence() {
        let html = format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type":"NewsArticle","headline":"Flood warning issued","articleBody":"{}"}}
            </script></head><body></body></html>"#,
            words(300)
        );
        let r = ExtractionChain::default().extract("https://x.com/a", &html);
        assert_eq!(r.headline.as_deref(), Some("Flood warning issued"));
        assert_eq!(r.fallback_level, FallbackLevel::Structured);
        assert_eq!(r.confidence_bucket(), Confidence::High);
        assert_eq!(text::word_count(r.body.as_deref().unwrap()), 300);
    }

    #[test]
    fn test_falls_through_to_readability() {
        let html = r#"<html><head><meta property="og:title" content="Market prices rise"></head>
            <body><div class="article-content">
            <p>Prices of rice, lentils and onions rose again this week, traders said on Friday.</p>
            <p>Wholesale markets reported thin supply, and retailers passed on the increase.</p>
            </div></body></html>"#;
        let r = ExtractionChain::default().extract("u", html);
        assert_eq!(r.headline.as_deref(), Some("Market prices rise"));
        assert_eq!(r.fallback_level, FallbackLevel::MlHeuristic);
        assert!(r.body.unwrap().contains("Wholesale markets"));
    }

    #[test]
    fn test_short_structured_body_replaced() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@type":"NewsArticle","headline":"Budget passed","articleBody":"Teaser."}
            </script></head><body><article>
            <p>Parliament passed the budget late on Thursday after a long debate, members said.</p>
            <p>The finance minister said the allocation for health and education had grown.</p>
            </article></body></html>"#;
        let r = ExtractionChain::default().extract("u", html);
        assert_eq!(r.headline.as_deref(), Some("Budget passed"));
        assert!(r.body.unwrap().contains("Parliament passed"));
        assert_ne!(r.fallback_level, FallbackLevel::Structured);
    }

    #[test]
    fn test_total_on_garbage_input() {
        let chain = ExtractionChain::default();
        for input in ["", "<<<>>>", "<html><body><div>", "plain text only", "\u{0}\u{1}"] {
            let r = chain.extract("u", input);
            assert_eq!(r.fallback_level, FallbackLevel::CssHeuristic);
            assert!(r.confidence > 0.0);
        }
    }

    #[test]
    fn test_origin_hints_used() {
        let html = r#"<html><body><h2 class="t">Hinted headline</h2>
            <div class="story">Only the hinted selector finds this text, which is long enough to count as a body.</div>
            </body></html>"#;
        let hints = ExtractionHints {
            headline_selectors: vec!["h2.t".into()],
            body_selectors: vec!["div.story".into()],
        };
        let r = ExtractionChain::default().extract_with_hints("u", html, &hints);
        assert_eq!(r.headline.as_deref(), Some("Hinted headline"));
        assert_eq!(r.fallback_level, FallbackLevel::CssHeuristic);
        assert_eq!(r.confidence, CSS_HEURISTIC_CONFIDENCE);
    }
}
