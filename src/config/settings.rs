//! Resolved runtime settings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use super::{ConfigError, OriginConfig};
use crate::extract::ExtractionConfig;
use crate::fetch::{ProxyRotation, DEFAULT_BAN_THRESHOLD};
use crate::resilience::{CircuitConfig, RetryConfig, ThrottleConfig};
use crate::validate::{ValidationConfig, ValidationMode};

pub(crate) const DATABASE_FILENAME: &str = "news.db";
pub(crate) const STRATEGY_CACHE_FILENAME: &str = "strategies.db";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "NEWSACQUIRE_";

/// Application settings.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// SQLite article database.
    pub database_path: PathBuf,
    /// SQLite cache of learned strategies.
    pub strategy_cache_path: PathBuf,
    /// User agent for the plain rung. `None` uses the built-in crawler UA.
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    /// Rotating proxies for the stealth rung.
    pub proxies: Vec<String>,
    pub proxy_rotation: ProxyRotation,
    /// Failures before a pooled proxy is skipped.
    pub proxy_ban_threshold: u32,
    /// Hard wall-clock limit for one HTTP or archive attempt.
    pub request_timeout: Duration,
    /// Hard wall-clock limit for one browser render.
    pub browser_timeout: Duration,
    pub browser_enabled: bool,
    pub browser_url: Option<String>,
    pub archive_enabled: bool,
    /// Global cap on in-flight fetches.
    pub concurrency: usize,
    /// Default cap on in-flight fetches per origin.
    pub per_origin_concurrency: usize,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
    pub throttle: ThrottleConfig,
    pub validation: ValidationConfig,
    pub extraction: ExtractionConfig,
    pub origins: HashMap<String, OriginConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: local data dir -> home dir -> current dir
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsacquire");

        Self {
            database_path: data_dir.join(DATABASE_FILENAME),
            strategy_cache_path: data_dir.join(STRATEGY_CACHE_FILENAME),
            data_dir,
            user_agent: None,
            proxy: None,
            proxies: Vec::new(),
            proxy_rotation: ProxyRotation::default(),
            proxy_ban_threshold: DEFAULT_BAN_THRESHOLD,
            request_timeout: Duration::from_secs(30),
            browser_timeout: Duration::from_secs(60),
            browser_enabled: false,
            browser_url: None,
            archive_enabled: true,
            concurrency: 8,
            per_origin_concurrency: 2,
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            throttle: ThrottleConfig::default(),
            validation: ValidationConfig::default(),
            extraction: ExtractionConfig::default(),
            origins: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}{}: cannot parse '{}'", ENV_PREFIX, key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{}{}: expected a boolean, got '{}'",
            ENV_PREFIX, key, raw
        ))),
    }
}

impl Settings {
    /// Move the data directory, keeping default file names inside it.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.database_path = data_dir.join(DATABASE_FILENAME);
        self.strategy_cache_path = data_dir.join(STRATEGY_CACHE_FILENAME);
        self.data_dir = data_dir;
    }

    /// Apply `NEWSACQUIRE_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| {
            std::env::var(format!("{}{}", ENV_PREFIX, key))
                .ok()
                .filter(|s| !s.is_empty())
        })
    }

    /// Apply overrides from `lookup`, keyed by the name after the prefix.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("DATA_DIR") {
            self.set_data_dir(PathBuf::from(shellexpand::tilde(&v).as_ref()));
        }
        if let Some(v) = lookup("DATABASE") {
            self.database_path = PathBuf::from(shellexpand::tilde(&v).as_ref());
        }
        if let Some(v) = lookup("USER_AGENT") {
            self.user_agent = Some(v);
        }
        if let Some(v) = lookup("PROXY") {
            self.proxy = Some(v);
        }
        if let Some(v) = lookup("PROXIES") {
            self.proxies = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("PROXY_ROTATION") {
            self.proxy_rotation = v.parse().map_err(|e| {
                ConfigError::Invalid(format!("{}PROXY_ROTATION: {}", ENV_PREFIX, e))
            })?;
        }
        if let Some(v) = lookup("PROXY_BAN_THRESHOLD") {
            self.proxy_ban_threshold = parse_env("PROXY_BAN_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("BROWSER_URL") {
            self.browser_url = Some(v);
            self.browser_enabled = true;
        }
        if let Some(v) = lookup("ARCHIVE") {
            self.archive_enabled = parse_bool("ARCHIVE", &v)?;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout = Duration::from_secs(parse_env("REQUEST_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("CONCURRENCY") {
            self.concurrency = parse_env("CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("PER_ORIGIN_CONCURRENCY") {
            self.per_origin_concurrency = parse_env("PER_ORIGIN_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("FAILURE_THRESHOLD") {
            self.circuit.failure_threshold = parse_env("FAILURE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("MIN_WORDS") {
            self.validation.min_words = parse_env("MIN_WORDS", &v)?;
        }
        if let Some(v) = lookup("VALIDATION_MODE") {
            self.validation.mode = ValidationMode::from_str(&v).ok_or_else(|| {
                ConfigError::Invalid(format!("{}VALIDATION_MODE: unknown mode '{}'", ENV_PREFIX, v))
            })?;
        }
        Ok(())
    }

    /// Reject values that would stall or spin the crawler.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.per_origin_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.retry.factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry factor {} would shrink backoff",
                self.retry.factor
            )));
        }
        if self.throttle.min_delay > self.throttle.max_delay {
            return Err(ConfigError::Invalid(
                "throttle min_delay exceeds max_delay".to_string(),
            ));
        }
        if self.proxy_ban_threshold == 0 {
            return Err(ConfigError::Invalid(
                "proxy_ban_threshold must be at least 1".to_string(),
            ));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.check().unwrap();
        assert!(settings.archive_enabled);
        assert!(!settings.browser_enabled);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.circuit.failure_threshold, 5);
        assert_eq!(settings.validation.min_words, 20);
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup(&[
                ("MAX_ATTEMPTS", "6"),
                ("VALIDATION_MODE", "Lenient"),
                ("BROWSER_URL", "http://127.0.0.1:9222"),
                ("ARCHIVE", "off"),
                ("DATA_DIR", "/var/lib/news"),
            ]))
            .unwrap();
        assert_eq!(settings.retry.max_attempts, 6);
        assert_eq!(settings.validation.mode, ValidationMode::Lenient);
        assert!(settings.browser_enabled);
        assert!(!settings.archive_enabled);
        assert_eq!(settings.database_path, PathBuf::from("/var/lib/news/news.db"));
    }

    #[test]
    fn test_bad_override_is_error() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_overrides(lookup(&[("CONCURRENCY", "many")]))
            .is_err());
        assert!(settings
            .apply_overrides(lookup(&[("ARCHIVE", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_proxy_pool_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup(&[
                ("PROXIES", "10.0.0.1:8080, socks5://10.0.0.2:1080,"),
                ("PROXY_ROTATION", "smart"),
                ("PROXY_BAN_THRESHOLD", "3"),
            ]))
            .unwrap();
        assert_eq!(settings.proxies, vec!["10.0.0.1:8080", "socks5://10.0.0.2:1080"]);
        assert_eq!(settings.proxy_rotation, ProxyRotation::Smart);
        assert_eq!(settings.proxy_ban_threshold, 3);

        assert!(settings
            .apply_overrides(lookup(&[("PROXY_ROTATION", "fastest")]))
            .is_err());
        settings.proxy_ban_threshold = 0;
        assert!(settings.check().is_err());
    }

    #[test]
    fn test_check_rejects_zero_concurrency() {
        let settings = Settings {
            concurrency: 0,
            ..Default::default()
        };
        assert!(settings.check().is_err());
    }
}
