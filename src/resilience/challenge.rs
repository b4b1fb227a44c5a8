//! Anti-bot challenge and rate-limit detection.
//!
//! Classification is pure: it looks only at the status code, body and
//! headers of one response, so it can be exercised against saved fixture
//! bodies without any network.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::parse_retry_after;

/// Bodies at or below this size are scanned in full.
pub const DEFAULT_SMALL_BODY_LIMIT: usize = 20 * 1024;

/// Bytes of a large body scanned when no `</head>` is found.
const HEAD_SCAN_LIMIT: usize = 8 * 1024;

/// Known interstitial and CAPTCHA fingerprints, most specific first.
const FINGERPRINTS: &[(&str, &str)] = &[
    ("cloudflare-interstitial", "just a moment..."),
    ("cloudflare-challenge", "_cf_chl_opt"),
    ("cloudflare-challenge", "challenge-platform"),
    ("cloudflare-block", "attention required! | cloudflare"),
    ("browser-check", "checking your browser"),
    ("verify-wait", "please wait while we verify"),
    ("ddos-guard", "ddos protection by"),
    ("turnstile", "turnstile"),
    ("hcaptcha", "hcaptcha"),
    ("recaptcha", "g-recaptcha"),
    ("js-required", "please enable javascript"),
    ("js-required", "needs javascript"),
    ("access-denied", "<title>access denied"),
    ("captcha", "captcha"),
];

static META_REFRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["']?\s*0\s*[;"']"#)
        .expect("meta refresh regex should compile")
});

/// What a response means for the resilience layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Real content.
    Ok,
    /// Anti-bot interstitial or CAPTCHA, whatever the status code.
    Challenge { signature: String },
    /// The origin asked us to slow down.
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<Duration>,
    },
    /// Error status with no challenge or rate-limit evidence.
    HardFail { status: u16 },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Challenge { .. } => "CHALLENGE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::HardFail { .. } => "HARD_FAIL",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Classifies responses using built-in fingerprints plus origin-specific ones.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    small_body_limit: usize,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self {
            small_body_limit: DEFAULT_SMALL_BODY_LIMIT,
        }
    }

    pub fn with_small_body_limit(mut self, limit: usize) -> Self {
        self.small_body_limit = limit;
        self
    }

    /// Classify one response.
    ///
    /// `headers` must use lowercased names. `origin_patterns` are extra
    /// case-insensitive body fingerprints configured for the origin.
    pub fn classify(
        &self,
        status: u16,
        body: &str,
        headers: &HashMap<String, String>,
        origin_patterns: &[String],
    ) -> Classification {
        if headers
            .get("cf-mitigated")
            .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
        {
            return Classification::Challenge {
                signature: "cf-mitigated".to_string(),
            };
        }

        let retry_after = parse_retry_after(headers.get("retry-after").map(|s| s.as_str()));

        if status == 429 {
            return Classification::RateLimited { retry_after };
        }

        if (200..400).contains(&status) {
            return match self.find_fingerprint(body, origin_patterns) {
                Some(signature) => Classification::Challenge { signature },
                None => Classification::Ok,
            };
        }

        // Error statuses: a challenge page beats everything else, then
        // explicit rate-limit evidence, then the status itself.
        if matches!(status, 403 | 503) {
            if let Some(signature) = self.find_fingerprint(body, origin_patterns) {
                return Classification::Challenge { signature };
            }
        }
        if retry_after.is_some() || rate_limit_exhausted(headers) {
            return Classification::RateLimited { retry_after };
        }
        Classification::HardFail { status }
    }

    /// Return the signature of the first fingerprint found in the body.
    pub fn find_fingerprint(&self, body: &str, origin_patterns: &[String]) -> Option<String> {
        let region = self.scan_region(body).to_lowercase();
        if region.is_empty() {
            return None;
        }

        for pattern in origin_patterns {
            let needle = pattern.trim().to_lowercase();
            if !needle.is_empty() && region.contains(&needle) {
                return Some(format!("origin:{}", pattern.trim()));
            }
        }

        for (signature, needle) in FINGERPRINTS {
            if region.contains(needle) {
                return Some((*signature).to_string());
            }
        }

        if body.len() <= self.small_body_limit && META_REFRESH_RE.is_match(&region) {
            return Some("meta-refresh".to_string());
        }
        None
    }

    /// The part of the body worth scanning: all of a small body, or the
    /// `<head>` of a large one.
    fn scan_region<'a>(&self, body: &'a str) -> &'a str {
        if body.len() <= self.small_body_limit {
            return body;
        }
        let end = find_ascii_ci(body, "</head>").unwrap_or(HEAD_SCAN_LIMIT.min(body.len()));
        &body[..floor_char_boundary(body, end)]
    }
}

fn rate_limit_exhausted(headers: &HashMap<String, String>) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .is_some_and(|v| v.trim() == "0")
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
