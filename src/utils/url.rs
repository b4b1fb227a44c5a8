//! Canonical URL normalization.

use thiserror::Error;
use url::Url;

/// Query parameters that never change the identity of an article.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "_ga", "mc_cid", "mc_eid"];

/// Prefixes of strings that are links but not documents.
const NON_DOCUMENT_PREFIXES: &[&str] = &["#", "javascript:", "void(0)", "mailto:", "tel:", "data:"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,
    #[error("not a document URL: {0}")]
    NotDocument(String),
    #[error("malformed URL {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Normalize an absolute article URL into its canonical form.
///
/// Lowercases the host, drops the fragment, default port and tracking
/// parameters, sorts the remaining query pairs and strips a trailing slash
/// from non-root paths.
pub fn canonicalize(raw: &str) -> Result<String, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let lower = trimmed.to_ascii_lowercase();
    if NON_DOCUMENT_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return Err(UrlError::NotDocument(trimmed.to_string()));
    }

    let mut url = Url::parse(trimmed).map_err(|e| UrlError::Malformed {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }
    // The parser lowercases domain hosts and drops default ports.
    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::MissingHost(trimmed.to_string()));
    }
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Origin key for a URL: its lowercased host without a leading `www.`.
pub fn origin_key(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_noise() {
        assert_eq!(
            canonicalize("HTTPS://WWW.Example.com:443/news/story/?utm_source=fb&b=2&a=1#top")
                .unwrap(),
            "https://www.example.com/news/story?a=1&b=2"
        );
        assert_eq!(
            canonicalize("http://example.com/").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            canonicalize("http://example.com:8080/a?fbclid=xyz").unwrap(),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn test_canonicalize_equivalent_urls_match() {
        let a = canonicalize("https://example.com/a/b/?x=1&utm_medium=rss").unwrap();
        let b = canonicalize("https://EXAMPLE.com/a/b?x=1#comments").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonicalize_rejects_non_documents() {
        assert!(matches!(canonicalize("#section"), Err(UrlError::NotDocument(_))));
        assert!(matches!(
            canonicalize("javascript:void(0)"),
            Err(UrlError::NotDocument(_))
        ));
        assert!(matches!(
            canonicalize("mailto:desk@example.com"),
            Err(UrlError::NotDocument(_))
        ));
        assert!(matches!(canonicalize("/relative/path"), Err(UrlError::Malformed { .. })));
        assert!(matches!(
            canonicalize("ftp://example.com/file"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert_eq!(canonicalize("   "), Err(UrlError::Empty));
    }

    #[test]
    fn test_origin_key() {
        assert_eq!(
            origin_key("https://www.prothomalo.com/x").as_deref(),
            Some("prothomalo.com")
        );
        assert_eq!(origin_key("not a url"), None);
    }
}
