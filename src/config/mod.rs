//! Configuration management for newsacquire using the prefer crate.
//!
//! The file format mirrors `Settings` with every field optional. Values
//! are layered: built-in defaults, then the config file, then
//! `NEWSACQUIRE_*` environment variables.

mod origin;
mod settings;

pub use origin::{OriginConfig, OriginConfigStore};
pub use settings::Settings;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::fetch::parse_proxy_list;
use crate::validate::ValidationMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Retry policy options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct RetrySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

/// Circuit breaker options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct CircuitSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
}

/// Adaptive throttle options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ThrottleSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_threshold_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_threshold: Option<u64>,
    /// Window for counting 403s on distinct URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forbidden_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forbidden_threshold: Option<u64>,
}

/// Quality gate options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct ValidationSection {
    /// "strict" or "lenient".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_headline_chars: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_non_text_ratio: Option<f64>,
    /// Bodies shorter than this send extraction to the next stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_body_chars: Option<u64>,
}

/// Per-origin entry in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct OriginSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[prefer(default)]
    pub challenge_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[prefer(default)]
    pub headline_selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[prefer(default)]
    pub body_selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u64>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Article database path, relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Learned strategy cache path, relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_cache: Option<String>,
    /// User agent for the plain rung.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Proxy for all HTTP rungs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Rotating proxies for the stealth rung.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[prefer(default)]
    pub proxies: Vec<String>,
    /// File with one proxy per line, appended to `proxies`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_list: Option<String>,
    /// round_robin, random or smart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_rotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_ban_threshold: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Browser render timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_timeout: Option<u64>,
    /// Remote DevTools endpoint. Setting it enables the browser rung.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_enabled: Option<bool>,
    /// Global concurrent fetch cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_origin_concurrency: Option<u64>,
    #[serde(default)]
    #[prefer(default)]
    pub retry: RetrySection,
    #[serde(default)]
    #[prefer(default)]
    pub circuit: CircuitSection,
    #[serde(default)]
    #[prefer(default)]
    pub throttle: ThrottleSection,
    #[serde(default)]
    #[prefer(default)]
    pub validation: ValidationSection,
    /// Per-origin rules, keyed by origin.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[prefer(default)]
    pub origins: HashMap<String, OriginSection>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a config file in the standard locations.
    pub async fn load() -> Self {
        match prefer::load("newsacquire").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring unreadable config: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path, by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_err("TOML", e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_err("YAML", e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_err("JSON", e.to_string()))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// The config file's directory, for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to `base_dir` or start with `~`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply file values on top of `settings`.
    pub fn apply_to_settings(
        &self,
        settings: &mut Settings,
        base_dir: &Path,
    ) -> Result<(), ConfigError> {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref database) = self.database {
            settings.database_path = self.resolve_path(database, &settings.data_dir);
        }
        if let Some(ref cache) = self.strategy_cache {
            settings.strategy_cache_path = self.resolve_path(cache, &settings.data_dir);
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = Some(ua.clone());
        }
        if let Some(ref proxy) = self.proxy {
            settings.proxy = Some(proxy.clone());
        }
        if !self.proxies.is_empty() || self.proxy_list.is_some() {
            let mut proxies = self.proxies.clone();
            if let Some(ref list) = self.proxy_list {
                let path = self.resolve_path(list, base_dir);
                let contents =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                proxies.extend(parse_proxy_list(&contents));
            }
            settings.proxies = proxies;
        }
        if let Some(ref rotation) = self.proxy_rotation {
            settings.proxy_rotation = rotation.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(n) = self.proxy_ban_threshold {
            settings.proxy_ban_threshold = n as u32;
        }
        if let Some(secs) = self.request_timeout {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.browser_timeout {
            settings.browser_timeout = Duration::from_secs(secs);
        }
        if let Some(ref url) = self.browser_url {
            settings.browser_url = Some(url.clone());
            settings.browser_enabled = true;
        }
        if let Some(enabled) = self.browser_enabled {
            settings.browser_enabled = enabled;
        }
        if let Some(enabled) = self.archive_enabled {
            settings.archive_enabled = enabled;
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n as usize;
        }
        if let Some(n) = self.per_origin_concurrency {
            settings.per_origin_concurrency = n as usize;
        }

        let retry = &mut settings.retry;
        if let Some(n) = self.retry.max_attempts {
            retry.max_attempts = n as u32;
        }
        if let Some(ms) = self.retry.base_delay_ms {
            retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(f) = self.retry.factor {
            retry.factor = f;
        }
        if let Some(ms) = self.retry.max_delay_ms {
            retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(j) = self.retry.jitter {
            retry.jitter = j;
        }

        if let Some(n) = self.circuit.failure_threshold {
            settings.circuit.failure_threshold = n as u32;
        }
        if let Some(secs) = self.circuit.cooldown_secs {
            settings.circuit.cooldown = Duration::from_secs(secs);
        }

        let throttle = &mut settings.throttle;
        let t = &self.throttle;
        if let Some(ms) = t.min_delay_ms {
            throttle.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = t.max_delay_ms {
            throttle.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = t.base_delay_ms {
            throttle.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = t.latency_threshold_ms {
            throttle.latency_threshold = Duration::from_millis(ms);
        }
        if let Some(m) = t.backoff_multiplier {
            throttle.backoff_multiplier = m;
        }
        if let Some(m) = t.recovery_multiplier {
            throttle.recovery_multiplier = m;
        }
        if let Some(n) = t.recovery_threshold {
            throttle.recovery_threshold = n as u32;
        }
        if let Some(secs) = t.forbidden_window_secs {
            throttle.forbidden_window = Duration::from_secs(secs);
        }
        if let Some(n) = t.forbidden_threshold {
            throttle.forbidden_threshold = n as usize;
        }

        let v = &self.validation;
        if let Some(ref mode) = v.mode {
            settings.validation.mode = ValidationMode::from_str(mode).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown validation mode '{}'", mode))
            })?;
        }
        if let Some(n) = v.min_words {
            settings.validation.min_words = n as usize;
        }
        if let Some(n) = v.min_headline_chars {
            settings.validation.min_headline_chars = n as usize;
        }
        if let Some(r) = v.max_non_text_ratio {
            settings.validation.max_non_text_ratio = r;
        }
        if let Some(n) = v.min_body_chars {
            settings.extraction.min_body_chars = n as usize;
        }

        for (origin, section) in &self.origins {
            settings
                .origins
                .insert(origin.clone(), OriginConfig::from_section(origin, section)?);
        }
        Ok(())
    }

    /// Compute SHA-256 hash of the serialized config.
    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Load settings from an explicit file, or from a discovered one.
///
/// Returns the resolved settings and the file config they came from.
pub async fn load_settings(config_path: Option<&Path>) -> Result<(Settings, Config), ConfigError> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir)?;
    settings.apply_env_overrides()?;
    settings.check()?;

    tracing::debug!("Configuration hash {}", config.hash());
    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::models::Strategy;

    fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_toml_config() {
        let file = write_config(
            ".toml",
            r#"
            concurrency = 4
            request_timeout = 10

            [retry]
            max_attempts = 5
            base_delay_ms = 250

            [circuit]
            failure_threshold = 3

            [validation]
            mode = "lenient"
            min_words = 30

            [origins."prothomalo.com"]
            paper_name = "Prothom Alo"
            expected_language = "bn"
            start_strategy = "stealth"
            body_selectors = ["div.story-element"]
            "#,
        );
        let config = Config::load_from_path(file.path()).await.unwrap();
        let mut settings = Settings::default();
        config
            .apply_to_settings(&mut settings, &config.base_dir().unwrap())
            .unwrap();

        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.circuit.failure_threshold, 3);
        assert_eq!(settings.validation.mode, ValidationMode::Lenient);
        assert_eq!(settings.validation.min_words, 30);

        let origin = &settings.origins["prothomalo.com"];
        assert_eq!(origin.paper_name, "Prothom Alo");
        assert_eq!(origin.start_strategy, Some(Strategy::Stealth));
        assert_eq!(origin.body_selectors, vec!["div.story-element".to_string()]);
    }

    #[tokio::test]
    async fn test_yaml_and_json_configs() {
        let yaml = write_config(".yaml", "concurrency: 2\nthrottle:\n  min_delay_ms: 750\n");
        let config = Config::load_from_path(yaml.path()).await.unwrap();
        assert_eq!(config.concurrency, Some(2));
        assert_eq!(config.throttle.min_delay_ms, Some(750));

        let json = write_config(".json", r#"{"archive_enabled": false}"#);
        let config = Config::load_from_path(json.path()).await.unwrap();
        assert_eq!(config.archive_enabled, Some(false));
    }

    #[tokio::test]
    async fn test_parse_error_names_format() {
        let bad = write_config(".toml", "concurrency = [");
        let err = Config::load_from_path(bad.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let config = Config {
            validation: ValidationSection {
                mode: Some("sometimes".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut settings = Settings::default();
        assert!(config
            .apply_to_settings(&mut settings, Path::new("."))
            .is_err());
    }

    #[tokio::test]
    async fn test_proxy_list_file_joins_inline_proxies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("proxies.txt"),
            "# rented pool\n203.0.113.5:3128\nsocks5://203.0.113.6:1080 # backup\n",
        )
        .unwrap();
        let config_path = dir.path().join("news.toml");
        std::fs::write(
            &config_path,
            r#"
            proxies = ["203.0.113.4:8080"]
            proxy_list = "proxies.txt"
            proxy_rotation = "random"
            proxy_ban_threshold = 2
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(&config_path).await.unwrap();
        let mut settings = Settings::default();
        config
            .apply_to_settings(&mut settings, &config.base_dir().unwrap())
            .unwrap();

        assert_eq!(
            settings.proxies,
            vec![
                "203.0.113.4:8080",
                "203.0.113.5:3128",
                "socks5://203.0.113.6:1080"
            ]
        );
        assert_eq!(settings.proxy_rotation, crate::fetch::ProxyRotation::Random);
        assert_eq!(settings.proxy_ban_threshold, 2);
    }

    #[test]
    fn test_missing_proxy_list_is_read_error() {
        let config = Config {
            proxy_list: Some("/nonexistent/proxies.txt".into()),
            ..Default::default()
        };
        let mut settings = Settings::default();
        let err = config
            .apply_to_settings(&mut settings, Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_relative_paths_resolve_against_data_dir() {
        let config = Config {
            data_dir: Some("/srv/news".into()),
            database: Some("articles.db".into()),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config
            .apply_to_settings(&mut settings, Path::new("/etc"))
            .unwrap();
        assert_eq!(settings.database_path, PathBuf::from("/srv/news/articles.db"));
        assert_eq!(
            settings.strategy_cache_path,
            PathBuf::from("/srv/news").join(super::settings::STRATEGY_CACHE_FILENAME)
        );
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config {
            concurrency: Some(3),
            ..Default::default()
        };
        let mut b = a.clone();
        b.source_path = Some(PathBuf::from("/tmp/x.toml"));
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
