//! Browser-shaped request headers for the stealth rung.

use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::user_agent::{random_from, CHROME_USER_AGENTS, FIREFOX_USER_AGENTS};

/// Accept-Language variants; Bengali-primary ones blend in on Bangladeshi sites.
pub const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "en-US,en;q=0.9,bn;q=0.8",
    "bn-BD,bn;q=0.9,en-US;q=0.8,en;q=0.7",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserProfile {
    Chrome,
    Firefox,
}

impl BrowserProfile {
    /// Chrome three times out of four, matching real traffic share.
    pub fn random() -> Self {
        if rand::rng().random_bool(0.75) {
            Self::Chrome
        } else {
            Self::Firefox
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Chrome => random_from(CHROME_USER_AGENTS),
            Self::Firefox => random_from(FIREFOX_USER_AGENTS),
        }
    }
}

/// Full header set for one navigation request with the given profile.
pub fn stealth_headers(profile: BrowserProfile) -> HeaderMap {
    let accept_language = ACCEPT_LANGUAGES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("en-US,en;q=0.9");

    let pairs: Vec<(&str, &str)> = match profile {
        BrowserProfile::Chrome => vec![
            (
                "sec-ch-ua",
                "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
            ),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("upgrade-insecure-requests", "1"),
            ("user-agent", profile.user_agent()),
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
            ),
            ("sec-fetch-site", "none"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-user", "?1"),
            ("sec-fetch-dest", "document"),
            ("accept-language", accept_language),
        ],
        BrowserProfile::Firefox => vec![
            ("user-agent", profile.user_agent()),
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
            ("accept-language", accept_language),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-site", "none"),
            ("sec-fetch-user", "?1"),
        ],
    };

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_profile_has_client_hints() {
        let headers = stealth_headers(BrowserProfile::Chrome);
        assert!(headers.contains_key("sec-ch-ua"));
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
        assert!(headers
            .get("user-agent")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Chrome"));
    }

    #[test]
    fn test_firefox_profile_has_no_client_hints() {
        let headers = stealth_headers(BrowserProfile::Firefox);
        assert!(!headers.contains_key("sec-ch-ua"));
        let lang = headers.get("accept-language").unwrap().to_str().unwrap();
        assert!(ACCEPT_LANGUAGES.contains(&lang));
    }
}
