//! Text cleanup shared by the extraction stages.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("script/style regex should compile")
});

static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/blockquote)\s*/?>")
        .expect("block tag regex should compile")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex should compile"));

static NUMERIC_ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&#(?:x([0-9a-fA-F]+)|([0-9]+));").expect("entity regex should compile")
});

static INLINE_BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(read more|also read|আরও পড়ুন)\s*:[^\n]*")
        .expect("boilerplate regex should compile")
});

/// Paragraphs starting with these are navigation or promotion, not content.
const BOILERPLATE_PREFIXES: &[&str] = &[
    "read more",
    "also read",
    "follow us on",
    "subscribe to",
    "click here",
    "advertisement",
    "আরও পড়ুন",
];

/// Decode the HTML entities that survive in JSON-LD and raw text.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let decoded = NUMERIC_ENTITY_RE.replace_all(s, |caps: &regex::Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_default()
    });
    decoded
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Strip markup, keeping block boundaries as newlines.
pub fn strip_tags(html: &str) -> String {
    let without_code = SCRIPT_STYLE_RE.replace_all(html, " ");
    let with_breaks = BLOCK_TAG_RE.replace_all(&without_code, "\n");
    let text = TAG_RE.replace_all(&with_breaks, " ");
    decode_entities(&text)
}

/// Collapse all whitespace runs to single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean an article body: strip leftover markup, drop boilerplate
/// paragraphs, normalize whitespace inside paragraphs and separate
/// paragraphs with a blank line.
pub fn clean_body(raw: &str) -> String {
    let text = if raw.contains('<') {
        strip_tags(raw)
    } else {
        decode_entities(raw)
    };
    let text = INLINE_BOILERPLATE_RE.replace_all(&text, "");

    text.split('\n')
        .map(normalize_whitespace)
        .filter(|p| !p.is_empty() && !is_boilerplate(p))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn is_boilerplate(paragraph: &str) -> bool {
    let lower = paragraph.to_lowercase();
    BOILERPLATE_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_entities("&#2476;&#x9BE;"), "বা");
        assert_eq!(decode_entities("a&nbsp;b &lt;c&gt;"), "a b <c>");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_strip_tags_drops_scripts() {
        let html = "<p>First</p><script>var x = 1;</script><p>Second &amp; last</p>";
        let text = strip_tags(html);
        assert!(!text.contains("var x"));
        assert!(text.contains("Second & last"));
    }

    #[test]
    fn test_clean_body() {
        let raw = "<p>Water levels rose  overnight.</p>\n<p>Read more: other story</p><p>Officials   responded.</p>\nFollow us on Facebook";
        assert_eq!(
            clean_body(raw),
            "Water levels rose overnight.\n\nOfficials responded."
        );
    }

    #[test]
    fn test_word_count_and_truncate() {
        assert_eq!(word_count("  one two\nthree "), 3);
        assert_eq!(truncate_chars("বাংলা", 2), "বা");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
