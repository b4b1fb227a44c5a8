//! Readability-style main content detection.
//!
//! Paragraphs vote for their parent and grandparent containers; the
//! container with the best score, adjusted for class/id hints and link
//! density, is taken as the article body.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::text::normalize_whitespace;
use super::ML_HEURISTIC_CONFIDENCE;
use crate::models::{ExtractionResult, FallbackLevel};

/// Paragraphs shorter than this do not vote.
const MIN_PARAGRAPH_CHARS: usize = 25;

static PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("p selector should parse"));
static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("a selector should parse"));
static H1: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("h1 selector should parse"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector should parse"));
static TIME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time[datetime]").expect("time selector should parse"));

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|main|post|text|story|news|details|description")
        .expect("positive hint regex should compile")
});
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)comment|meta|footer|footnote|sidebar|widget|share|social|related|promo|nav|menu|advert|subscribe|newsletter|popular|trending")
        .expect("negative hint regex should compile")
});

fn paragraph_text(p: ElementRef<'_>) -> String {
    normalize_whitespace(&p.text().collect::<String>())
}

fn link_density(el: ElementRef<'_>) -> f64 {
    let total: usize = el.text().map(|t| t.trim().len()).sum();
    if total == 0 {
        return 1.0;
    }
    let linked: usize = el
        .select(&LINK)
        .flat_map(|a| a.text())
        .map(|t| t.trim().len())
        .sum();
    linked as f64 / total as f64
}

fn class_weight(el: ElementRef<'_>) -> f64 {
    let attrs = el.value();
    let mut weight = 0.0;
    for value in [attrs.attr("class"), attrs.attr("id")].into_iter().flatten() {
        if NEGATIVE_RE.is_match(value) {
            weight -= 25.0;
        }
        if POSITIVE_RE.is_match(value) {
            weight += 25.0;
        }
    }
    weight
}

fn paragraph_score(text: &str) -> f64 {
    let commas = text.matches([',', '،', '।']).count() as f64;
    let length_bonus = (text.chars().count() as f64 / 100.0).min(3.0);
    1.0 + commas + length_bonus
}

/// Find the highest scoring content container.
pub fn best_candidate(doc: &Html) -> Option<ElementRef<'_>> {
    let mut scores = HashMap::new();

    for p in doc.select(&PARAGRAPH) {
        let text = paragraph_text(p);
        if text.chars().count() < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let score = paragraph_score(&text);

        let Some(parent) = p.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        *scores.entry(parent.id()).or_insert(0.0) += score;
        if let Some(grandparent) = parent.parent().and_then(ElementRef::wrap) {
            *scores.entry(grandparent.id()).or_insert(0.0) += score / 2.0;
        }
    }

    scores
        .into_iter()
        .filter_map(|(id, score)| {
            let el = doc.tree.get(id).and_then(ElementRef::wrap)?;
            if matches!(el.value().name(), "html" | "body") {
                return None;
            }
            let adjusted = (score + class_weight(el)) * (1.0 - link_density(el));
            Some((el, adjusted))
        })
        .filter(|(_, score)| *score > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(el, _)| el)
}

/// Headline from the first `<h1>`, else the `<title>` without a site suffix.
pub fn headline(doc: &Html) -> Option<String> {
    doc.select(&H1)
        .map(paragraph_text)
        .find(|t| !t.is_empty())
        .or_else(|| {
            doc.select(&TITLE)
                .next()
                .map(paragraph_text)
                .map(|t| strip_site_suffix(&t))
                .filter(|t| !t.is_empty())
        })
}

fn strip_site_suffix(title: &str) -> String {
    for sep in [" | ", " - ", " :: ", " – "] {
        if let Some((head, _)) = title.rsplit_once(sep) {
            if head.chars().count() >= 10 {
                return head.trim().to_string();
            }
        }
    }
    title.trim().to_string()
}

pub fn extract(doc: &Html, url: &str) -> ExtractionResult {
    let mut result =
        ExtractionResult::empty(url, FallbackLevel::MlHeuristic, ML_HEURISTIC_CONFIDENCE);
    result.headline = headline(doc);

    if let Some(candidate) = best_candidate(doc) {
        let paragraphs: Vec<String> = candidate
            .select(&PARAGRAPH)
            .filter(|p| link_density(*p) < 0.5)
            .map(paragraph_text)
            .filter(|t| t.chars().count() >= MIN_PARAGRAPH_CHARS / 2)
            .collect();
        if !paragraphs.is_empty() {
            result.body = Some(paragraphs.join("\n"));
        }
    }

    result.published_at = doc
        .select(&TIME)
        .filter_map(|t| t.value().attr("datetime"))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Cyclone nears the coast | Daily Example</title></head>
    <body>
      <nav class="menu"><p>Home, National, Politics, Sports, Entertainment, Opinion</p></nav>
      <div class="story-content">
        <p>The cyclone is expected to make landfall by evening, officials said, with winds of 120 km/h.</p>
        <p>Coastal districts have opened more than 4,000 shelters, and volunteers are moving residents inland.</p>
        <p>Fishing boats have been ordered to return to harbour, according to the met office.</p>
      </div>
      <aside class="sidebar related"><p><a href="/a">A related story that is mostly a link, here</a></p></aside>
    </body></html>"#;

    #[test]
    fn test_picks_story_container() {
        let doc = Html::parse_document(PAGE);
        let best = best_candidate(&doc).unwrap();
        assert_eq!(best.value().attr("class"), Some("story-content"));

        let r = extract(&doc, "https://x.com/a");
        let body = r.body.unwrap();
        assert!(body.contains("landfall"));
        assert!(body.contains("harbour"));
        assert!(!body.contains("related story"));
        assert_eq!(r.headline.as_deref(), Some("Cyclone nears the coast"));
        assert_eq!(r.fallback_level, FallbackLevel::MlHeuristic);
    }

    #[test]
    fn test_no_paragraphs_no_body() {
        let doc = Html::parse_document("<html><body><div>short</div></body></html>");
        assert!(best_candidate(&doc).is_none());
        assert!(extract(&doc, "u").body.is_none());
    }
}
