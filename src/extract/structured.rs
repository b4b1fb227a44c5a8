//! Structured metadata: JSON-LD, schema.org microdata and OpenGraph.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::text::normalize_whitespace;
use super::STRUCTURED_CONFIDENCE;
use crate::models::{ExtractionResult, FallbackLevel};

/// schema.org types treated as articles.
const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "ReportageNewsArticle",
    "AnalysisNewsArticle",
];

/// Accepted only when no article type is present.
const GENERIC_PAGE_TYPE: &str = "WebPage";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("built-in selector should parse")
}

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"script[type="application/ld+json"]"#));
static ITEMPROP_HEADLINE: LazyLock<Selector> = LazyLock::new(|| selector(r#"[itemprop="headline"]"#));
static ITEMPROP_BODY: LazyLock<Selector> = LazyLock::new(|| selector(r#"[itemprop="articleBody"]"#));
static ITEMPROP_AUTHOR: LazyLock<Selector> = LazyLock::new(|| selector(r#"[itemprop="author"]"#));
static ITEMPROP_NAME: LazyLock<Selector> = LazyLock::new(|| selector(r#"[itemprop="name"]"#));
static ITEMPROP_DATE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[itemprop="datePublished"]"#));
static META: LazyLock<Selector> = LazyLock::new(|| selector("meta"));

/// Extract whatever structured metadata the page carries.
pub fn extract(doc: &Html, url: &str) -> ExtractionResult {
    let mut result = ExtractionResult::empty(url, FallbackLevel::Structured, STRUCTURED_CONFIDENCE);

    if let Some(ld) = json_ld(doc, url) {
        result = ld;
    }
    let micro = microdata(doc, url);
    result.fill_from(&micro);
    let og = meta_tags(doc, url);
    result.fill_from(&og);
    result
}

/// First article object found in the page's JSON-LD blocks.
///
/// Specific article types win over a generic `WebPage` anywhere on the page.
pub fn json_ld(doc: &Html, url: &str) -> Option<ExtractionResult> {
    let blocks: Vec<Value> = doc
        .select(&LD_JSON)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            match serde_json::from_str(raw.trim()) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!("Skipping malformed JSON-LD on {}: {}", url, e);
                    None
                }
            }
        })
        .collect();

    let article = blocks
        .iter()
        .find_map(|v| find_typed(v, ARTICLE_TYPES))
        .or_else(|| blocks.iter().find_map(|v| find_typed(v, &[GENERIC_PAGE_TYPE])))?;
    Some(article_from_json(article, url))
}

fn find_typed<'a>(value: &'a Value, types: &[&str]) -> Option<&'a Value> {
    match value {
        Value::Array(items) => items.iter().find_map(|v| find_typed(v, types)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                return find_typed(graph, types);
            }
            has_type(map.get("@type"), types).then_some(value)
        }
        _ => None,
    }
}

fn has_type(type_value: Option<&Value>, types: &[&str]) -> bool {
    match type_value {
        Some(Value::String(s)) => types.contains(&s.as_str()),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| types.contains(&s)),
        _ => false,
    }
}

fn article_from_json(article: &Value, url: &str) -> ExtractionResult {
    let mut result = ExtractionResult::empty(url, FallbackLevel::Structured, STRUCTURED_CONFIDENCE);
    result.headline = string_field(article, &["headline", "name"]);
    result.body = string_field(article, &["articleBody", "text"]);
    result.author = article.get("author").and_then(name_of);
    result.published_at = string_field(article, &["datePublished", "dateCreated"]);
    result.image_url = article.get("image").and_then(url_of);
    result.category = article.get("articleSection").and_then(first_string);
    result
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(first_string)
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_string),
        _ => None,
    }
}

/// Author may be a string, a Person object or a list of either.
fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map.get("name").and_then(first_string),
        Value::Array(items) => {
            let names: Vec<String> = items.iter().filter_map(name_of).collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        _ => None,
    }
}

/// Image may be a URL, an ImageObject or a list of either.
fn url_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => map
            .get("url")
            .or_else(|| map.get("contentUrl"))
            .and_then(first_string),
        Value::Array(items) => items.iter().find_map(url_of),
        _ => None,
    }
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    if let Some(content) = el.value().attr("content") {
        let content = content.trim();
        if !content.is_empty() {
            return Some(content.to_string());
        }
    }
    let text = normalize_whitespace(&el.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// schema.org microdata attributes.
pub fn microdata(doc: &Html, url: &str) -> ExtractionResult {
    let mut result = ExtractionResult::empty(url, FallbackLevel::Structured, STRUCTURED_CONFIDENCE);
    result.headline = doc.select(&ITEMPROP_HEADLINE).find_map(element_text);
    result.body = doc.select(&ITEMPROP_BODY).next().map(|el| {
        el.text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    });
    result.author = doc.select(&ITEMPROP_AUTHOR).find_map(|el| {
        el.select(&ITEMPROP_NAME)
            .next()
            .and_then(element_text)
            .or_else(|| element_text(el))
    });
    result.published_at = doc.select(&ITEMPROP_DATE).find_map(|el| {
        el.value()
            .attr("datetime")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| element_text(el))
    });
    result
}

/// OpenGraph and `article:*` meta tags.
pub fn meta_tags(doc: &Html, url: &str) -> ExtractionResult {
    let mut result = ExtractionResult::empty(url, FallbackLevel::Structured, STRUCTURED_CONFIDENCE);
    for meta in doc.select(&META) {
        let attrs = meta.value();
        let key = attrs
            .attr("property")
            .or_else(|| attrs.attr("name"))
            .map(|k| k.trim().to_ascii_lowercase());
        let (Some(key), Some(content)) = (key, attrs.attr("content")) else {
            continue;
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let slot = match key.as_str() {
            "og:title" | "twitter:title" => &mut result.headline,
            "og:image" | "twitter:image" => &mut result.image_url,
            "article:published_time" | "pubdate" | "publish-date" => &mut result.published_at,
            "article:section" => &mut result.category,
            "author" => &mut result.author,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(content.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_ld_graph_and_type_arrays() {
        let html = r#"<html><head><script type="application/ld+json">
        {"@context": "https://schema.org", "@graph": [
            {"@type": "Organization", "name": "Daily Example"},
            {"@type": ["NewsArticle", "Thing"], "headline": "Flood warning issued",
             "articleBody": "Rivers rose.", "author": [{"@type": "Person", "name": "A. Rahman"}, "B. Khan"],
             "datePublished": "2024-07-01T08:00:00+06:00",
             "image": {"@type": "ImageObject", "url": "https://x.com/a.jpg"},
             "articleSection": ["Bangladesh"]}
        ]}</script></head><body></body></html>"#;
        let doc = Html::parse_document(html);
        let r = json_ld(&doc, "https://x.com/a").unwrap();
        assert_eq!(r.headline.as_deref(), Some("Flood warning issued"));
        assert_eq!(r.body.as_deref(), Some("Rivers rose."));
        assert_eq!(r.author.as_deref(), Some("A. Rahman, B. Khan"));
        assert_eq!(r.image_url.as_deref(), Some("https://x.com/a.jpg"));
        assert_eq!(r.category.as_deref(), Some("Bangladesh"));
        assert_eq!(r.fallback_level, FallbackLevel::Structured);
    }

    #[test]
    fn test_malformed_json_ld_is_skipped() {
        let html = r#"<script type="application/ld+json">{ not json</script>
        <script type="application/ld+json">{"@type": "Article", "headline": "Second"}</script>"#;
        let doc = Html::parse_document(html);
        assert_eq!(
            json_ld(&doc, "u").unwrap().headline.as_deref(),
            Some("Second")
        );
    }

    #[test]
    fn test_microdata_and_meta_fill_gaps() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG title">
            <meta property="article:section" content="Politics">
            <meta property="og:image" content="https://x.com/i.png">
        </head><body><article>
            <h1 itemprop="headline">Microdata headline</h1>
            <span itemprop="author"><span itemprop="name">S. Akter</span></span>
            <time itemprop="datePublished" datetime="2024-05-02">May 2</time>
            <div itemprop="articleBody"><p>Para one.</p><p>Para two.</p></div>
        </article></body></html>"#;
        let doc = Html::parse_document(html);
        let r = extract(&doc, "u");
        assert_eq!(r.headline.as_deref(), Some("Microdata headline"));
        assert_eq!(r.author.as_deref(), Some("S. Akter"));
        assert_eq!(r.published_at.as_deref(), Some("2024-05-02"));
        assert_eq!(r.body.as_deref(), Some("Para one.\nPara two."));
        assert_eq!(r.category.as_deref(), Some("Politics"));
        assert_eq!(r.image_url.as_deref(), Some("https://x.com/i.png"));
    }

    #[test]
    fn test_article_preferred_over_webpage() {
        let html = r#"<script type="application/ld+json">{"@type": "WebPage", "name": "Section page"}</script>
        <script type="application/ld+json">{"@type": "NewsArticle", "headline": "Real story"}</script>"#;
        let doc = Html::parse_document(html);
        assert_eq!(
            json_ld(&doc, "u").unwrap().headline.as_deref(),
            Some("Real story")
        );
    }

    #[test]
    fn test_non_article_json_ld_ignored() {
        let html = r#"<script type="application/ld+json">{"@type": "BreadcrumbList"}</script>"#;
        let doc = Html::parse_document(html);
        assert!(json_ld(&doc, "u").is_none());
    }
}
