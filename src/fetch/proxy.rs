//! Rotating proxy pool for the stealth rung.
//!
//! Each proxy carries a failure count. Connection errors and ban-looking
//! responses raise it, clean responses lower it, and a proxy at the ban
//! threshold is skipped until every proxy is banned, when the bans reset.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use super::FetchError;

/// Default failures before a proxy is banned.
pub const DEFAULT_BAN_THRESHOLD: u32 = 5;

/// Statuses proxies typically answer with once a target has flagged them.
const BAN_STATUSES: [u16; 4] = [403, 407, 429, 503];

/// Body markers of a block page, matched in the first [`BAN_SNIFF_LEN`] bytes.
const BAN_MARKERS: [&str; 5] = [
    "blocked",
    "banned",
    "captcha",
    "access denied",
    "too many requests",
];
const BAN_SNIFF_LEN: usize = 1000;

const PROXY_SCHEMES: [&str; 4] = ["http", "https", "socks5", "socks5h"];

/// Order in which the pool hands out proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyRotation {
    #[default]
    RoundRobin,
    Random,
    /// Fewest recorded failures first.
    Smart,
}

impl ProxyRotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Smart => "smart",
        }
    }
}

impl fmt::Display for ProxyRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "smart" => Ok(Self::Smart),
            other => Err(format!(
                "unknown proxy rotation '{}' (expected round_robin, random or smart)",
                other
            )),
        }
    }
}

/// Add `http://` to scheme-less entries and reject unsupported schemes.
pub fn normalize_proxy(raw: &str) -> Result<String, FetchError> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let parsed = Url::parse(&candidate)
        .map_err(|e| FetchError::Other(format!("Invalid proxy '{}': {}", mask_proxy(raw), e)))?;
    if !PROXY_SCHEMES.contains(&parsed.scheme()) || parsed.host_str().is_none() {
        return Err(FetchError::Other(format!(
            "Invalid proxy '{}': expected http, https, socks5 or socks5h with a host",
            mask_proxy(raw)
        )));
    }
    Ok(candidate)
}

/// Proxy URL safe for logs: any password is replaced.
pub fn mask_proxy(proxy: &str) -> String {
    match Url::parse(proxy) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => proxy.to_string(),
    }
}

/// Whether a response looks like the target refused the proxy.
pub fn is_ban_response(status: u16, body: &str) -> bool {
    if BAN_STATUSES.contains(&status) {
        return true;
    }
    let mut end = body.len().min(BAN_SNIFF_LEN);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let head = body[..end].to_lowercase();
    BAN_MARKERS.iter().any(|m| head.contains(m))
}

#[derive(Debug, Default)]
struct PoolState {
    cursor: usize,
    failures: HashMap<String, u32>,
    banned: HashSet<String>,
}

/// Proxies shared by every request of one fetcher.
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<String>,
    rotation: ProxyRotation,
    ban_threshold: u32,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Build a pool from raw entries. Duplicates are dropped.
    pub fn new<I, S>(entries: I, rotation: ProxyRotation, ban_threshold: u32) -> Result<Self, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut proxies: Vec<String> = Vec::new();
        for entry in entries {
            let proxy = normalize_proxy(entry.as_ref())?;
            if !proxies.contains(&proxy) {
                proxies.push(proxy);
            }
        }
        Ok(Self {
            proxies,
            rotation,
            ban_threshold: ban_threshold.max(1),
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn rotation(&self) -> ProxyRotation {
        self.rotation
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The proxy for the next request, or `None` for an empty pool.
    pub fn next(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let mut state = self.state();
        if state.banned.len() >= self.proxies.len() {
            error!(
                "All {} proxies are banned, clearing bans",
                self.proxies.len()
            );
            state.banned.clear();
            state.failures.clear();
        }

        let live: Vec<&String> = self
            .proxies
            .iter()
            .filter(|p| !state.banned.contains(*p))
            .collect();
        let chosen = match self.rotation {
            ProxyRotation::RoundRobin => {
                // Walk the full list so banned entries keep their position.
                let n = self.proxies.len();
                let start = state.cursor % n;
                let index = (0..n)
                    .map(|i| (start + i) % n)
                    .find(|&i| !state.banned.contains(&self.proxies[i]))?;
                state.cursor = index + 1;
                &self.proxies[index]
            }
            ProxyRotation::Random => *live.choose(&mut rand::rng())?,
            ProxyRotation::Smart => *live
                .iter()
                .min_by_key(|p| state.failures.get(**p).copied().unwrap_or(0))?,
        };
        Some(chosen.clone())
    }

    /// A clean response lowers the proxy's failure count.
    pub fn record_success(&self, proxy: &str) {
        let mut state = self.state();
        if let Some(count) = state.failures.get_mut(proxy) {
            *count = count.saturating_sub(1);
        }
    }

    /// Count a failure. Returns true if this banned the proxy.
    pub fn record_failure(&self, proxy: &str) -> bool {
        let mut state = self.state();
        let count = state.failures.entry(proxy.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        if count >= self.ban_threshold && state.banned.insert(proxy.to_string()) {
            warn!("Banned proxy {} after {} failures", mask_proxy(proxy), count);
            return true;
        }
        debug!("Proxy {} failure {}/{}", mask_proxy(proxy), count, self.ban_threshold);
        false
    }

    /// Classify a response received through `proxy`. Returns true if the
    /// proxy was banned.
    pub fn record_response(&self, proxy: &str, status: u16, body: &str) -> bool {
        if is_ban_response(status, body) {
            self.record_failure(proxy)
        } else {
            self.record_success(proxy);
            false
        }
    }

    pub fn is_banned(&self, proxy: &str) -> bool {
        self.state().banned.contains(proxy)
    }

    pub fn failures(&self, proxy: &str) -> u32 {
        self.state().failures.get(proxy).copied().unwrap_or(0)
    }
}

/// Read a proxy list: one entry per line, `#` starts a comment.
pub fn parse_proxy_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
