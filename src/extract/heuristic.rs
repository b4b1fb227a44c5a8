//! Generic structural selectors, the last HTML-aware stage.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::text::{normalize_whitespace, strip_tags, truncate_chars};
use super::{ExtractionHints, CSS_HEURISTIC_CONFIDENCE, RAW_TEXT_CONFIDENCE};
use crate::models::{ExtractionResult, FallbackLevel};

const HEADLINE_SELECTORS: &[&str] = &[
    "h1.article-title",
    "h1.post-title",
    "h1.entry-title",
    "h1[itemprop='headline']",
    ".headline h1",
    "article h1",
    "h1",
];

const BODY_SELECTORS: &[&str] = &[
    "article .content",
    ".article-body",
    ".post-content",
    ".entry-content",
    "[itemprop='articleBody']",
    "article p",
    ".content p",
];

const AUTHOR_SELECTORS: &[&str] = &[".author", "[rel='author']", ".byline", ".post-author"];

const BREADCRUMB_SELECTORS: &[&str] = &[
    ".breadcrumb a",
    "nav[aria-label='breadcrumb'] a",
    "[itemtype*='BreadcrumbList'] [itemprop='name']",
];

/// Fragments this short are bylines, captions or buttons.
const MIN_FRAGMENT_CHARS: usize = 20;

/// Cap on the raw-text fallback body.
const RAW_BODY_MAX_CHARS: usize = 5000;

static BLOCKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("article, main, section, div").expect("block selector should parse")
});
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector should parse"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("body selector should parse"));

fn parse_selectors<'a>(list: impl IntoIterator<Item = &'a str>) -> Vec<Selector> {
    list.into_iter()
        .filter_map(|css| match Selector::parse(css) {
            Ok(sel) => Some(sel),
            Err(e) => {
                debug!("Skipping invalid selector {:?}: {:?}", css, e);
                None
            }
        })
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<String>())
}

fn first_text(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        doc.select(sel)
            .map(element_text)
            .find(|t| !t.is_empty())
    })
}

/// Body from the first selector that yields substantial fragments.
fn body_from(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        let fragments: Vec<String> = doc
            .select(sel)
            .map(element_text)
            .filter(|t| t.chars().count() > MIN_FRAGMENT_CHARS)
            .collect();
        (!fragments.is_empty()).then(|| fragments.join("\n"))
    })
}

/// The block with the most paragraph text directly beneath it.
fn densest_block(doc: &Html) -> Option<String> {
    doc.select(&BLOCKS)
        .filter_map(|block| {
            let paragraphs: Vec<String> = block
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == "p")
                .map(element_text)
                .filter(|t| t.chars().count() > MIN_FRAGMENT_CHARS)
                .collect();
            let len: usize = paragraphs.iter().map(String::len).sum();
            (len > 0).then_some((paragraphs, len))
        })
        .max_by_key(|(_, len)| *len)
        .map(|(paragraphs, _)| paragraphs.join("\n"))
}

fn title_text(doc: &Html) -> Option<String> {
    doc.select(&TITLE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Last crumb before the article itself.
fn breadcrumb_category(doc: &Html) -> Option<String> {
    let selectors = parse_selectors(BREADCRUMB_SELECTORS.iter().copied());
    selectors.iter().find_map(|sel| {
        let crumbs: Vec<String> = doc
            .select(sel)
            .map(element_text)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("home"))
            .collect();
        crumbs.into_iter().next_back()
    })
}

pub fn extract(doc: &Html, url: &str, hints: &ExtractionHints) -> ExtractionResult {
    let mut result =
        ExtractionResult::empty(url, FallbackLevel::CssHeuristic, CSS_HEURISTIC_CONFIDENCE);

    let origin_headline = parse_selectors(hints.headline_selectors.iter().map(String::as_str));
    let origin_body = parse_selectors(hints.body_selectors.iter().map(String::as_str));
    let generic_headline = parse_selectors(HEADLINE_SELECTORS.iter().copied());
    let generic_body = parse_selectors(BODY_SELECTORS.iter().copied());

    result.headline = first_text(doc, &origin_headline)
        .or_else(|| first_text(doc, &generic_headline))
        .or_else(|| title_text(doc));
    result.body = body_from(doc, &origin_body)
        .or_else(|| body_from(doc, &generic_body))
        .or_else(|| densest_block(doc));
    result.author = first_text(doc, &parse_selectors(AUTHOR_SELECTORS.iter().copied()));
    result.category = breadcrumb_category(doc);
    result
}

/// Tag-stripped page text. Used when no selector finds anything.
pub fn raw_text(doc: &Html, url: &str) -> ExtractionResult {
    let mut result =
        ExtractionResult::empty(url, FallbackLevel::CssHeuristic, RAW_TEXT_CONFIDENCE);
    result.headline = title_text(doc);

    let html = doc
        .select(&BODY)
        .next()
        .map(|b| b.html())
        .unwrap_or_else(|| doc.root_element().html());
    let text = strip_tags(&html);
    let text = text
        .lines()
        .map(normalize_whitespace)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !text.is_empty() {
        result.body = Some(truncate_chars(&text, RAW_BODY_MAX_CHARS).to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_selectors() {
        let html = r#"<html><head><title>Site</title></head><body>
            <h1 class="entry-title">Rail line reopens after repairs</h1>
            <span class="byline">Staff Correspondent</span>
            <div class="entry-content"><p>The line between the two cities reopened on Sunday morning.</p></div>
            </body></html>"#;
        let doc = Html::parse_document(html);
        let r = extract(&doc, "u", &ExtractionHints::default());
        assert_eq!(r.headline.as_deref(), Some("Rail line reopens after repairs"));
        assert!(r.body.unwrap().contains("reopened on Sunday"));
        assert_eq!(r.author.as_deref(), Some("Staff Correspondent"));
        assert_eq!(r.fallback_level, FallbackLevel::CssHeuristic);
    }

    #[test]
    fn test_origin_hints_first() {
        let html = r#"<html><body>
            <h1>Generic heading</h1>
            <h2 class="news-title">Origin specific heading</h2>
            <div class="news-text">Body text chosen through the configured origin selector.</div>
            </body></html>"#;
        let hints = ExtractionHints {
            headline_selectors: vec!["h2.news-title".into()],
            body_selectors: vec!["div.news-text".into(), "not a [valid".into()],
        };
        let doc = Html::parse_document(html);
        let r = extract(&doc, "u", &hints);
        assert_eq!(r.headline.as_deref(), Some("Origin specific heading"));
        assert!(r.body.unwrap().starts_with("Body text chosen"));
    }

    #[test]
    fn test_densest_block() {
        let html = r#"<html><body>
            <div class="a"><p>Short bit of text here, not much.</p></div>
            <div class="b">
              <p>The first long paragraph describes the event in some detail for readers.</p>
              <p>The second long paragraph adds quotes from officials and residents alike.</p>
            </div></body></html>"#;
        let doc = Html::parse_document(html);
        let body = densest_block(&doc).unwrap();
        assert!(body.contains("first long paragraph"));
        assert!(body.contains("second long paragraph"));
    }

    #[test]
    fn test_breadcrumb_category() {
        let html = r#"<html><body><ol class="breadcrumb"><a href="/">Home</a><a href="/national">National</a></ol></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(breadcrumb_category(&doc).as_deref(), Some("National"));
    }

    #[test]
    fn test_raw_text_truncates() {
        let long = "word ".repeat(3000);
        let html = format!("<html><head><title>T</title></head><body><span>{long}</span></body></html>");
        let doc = Html::parse_document(&html);
        let r = raw_text(&doc, "u");
        assert_eq!(r.body.unwrap().chars().count(), RAW_BODY_MAX_CHARS);
        assert_eq!(r.confidence, RAW_TEXT_CONFIDENCE);
    }
}
