//! Fetch strategies and per-attempt outcomes.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A rung on the escalation ladder.
///
/// Variants are declared cheapest first, so the derived ordering is the
/// ladder ordering: `Plain < Stealth < Browser < Archive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Plain HTTP request with the crawler's own user agent.
    Plain,
    /// HTTP request with browser-shaped headers and cookie reuse.
    Stealth,
    /// Full browser rendering with JavaScript execution.
    Browser,
    /// Historical archive snapshot.
    Archive,
}

impl Strategy {
    /// Every rung, cheapest first.
    pub const LADDER: [Strategy; 4] = [
        Strategy::Plain,
        Strategy::Stealth,
        Strategy::Browser,
        Strategy::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Stealth => "stealth",
            Self::Browser => "browser",
            Self::Archive => "archive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "stealth" => Some(Self::Stealth),
            "browser" => Some(Self::Browser),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }

    /// Whether this rung fetches the live page. The archive only serves
    /// earlier captures, so it is never a starting point for new articles.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Archive)
    }

    /// The next heavier rung, if any.
    pub fn stronger(&self) -> Option<Self> {
        match self {
            Self::Plain => Some(Self::Stealth),
            Self::Stealth => Some(Self::Browser),
            Self::Browser => Some(Self::Archive),
            Self::Archive => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse outcome of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    Blocked,
    Error,
}

/// A document as returned by any fetch strategy, before classification.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// HTTP status (archive and browser rungs report the status they observed, or 200).
    pub status: u16,
    /// Response headers with lowercased names.
    pub headers: HashMap<String, String>,
    pub body: String,
    /// URL after redirects.
    pub final_url: String,
}

impl RawPage {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            final_url: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = url.into();
        self
    }

    /// Header lookup by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// Result of one classified fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status_class: StatusClass,
    /// `None` when the attempt never produced a response.
    pub http_status: Option<u16>,
    pub body: String,
    pub elapsed_latency: Duration,
    pub strategy_used: Strategy,
    pub final_url: String,
}
