//! Versioned per-origin configuration.
//!
//! A crawl job takes an `Arc<OriginConfig>` snapshot when it starts and uses
//! it unchanged until it finishes. The only way to change an origin's rules
//! is to replace the record, which bumps its version; the crawler never
//! edits them in flight.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use super::{ConfigError, OriginSection};
use crate::extract::ExtractionHints;
use crate::models::Strategy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginConfig {
    pub version: u64,
    pub paper_name: String,
    /// ISO 639-1 code articles from this origin are expected to be in.
    pub expected_language: Option<String>,
    /// Overrides the global minimum word count.
    pub min_words: Option<usize>,
    /// Extra body substrings that mark a challenge page on this origin.
    pub challenge_patterns: Vec<String>,
    /// Lowest rung to try. Raised further by the learned strategy.
    pub start_strategy: Option<Strategy>,
    pub headline_selectors: Vec<String>,
    pub body_selectors: Vec<String>,
    /// Overrides the global per-origin concurrency cap.
    pub max_concurrency: Option<usize>,
}

impl OriginConfig {
    /// Configuration for an origin with no explicit entry.
    pub fn default_for(origin: &str) -> Self {
        Self {
            version: 0,
            paper_name: origin.to_string(),
            expected_language: None,
            min_words: None,
            challenge_patterns: Vec::new(),
            start_strategy: None,
            headline_selectors: Vec::new(),
            body_selectors: Vec::new(),
            max_concurrency: None,
        }
    }

    pub fn from_section(origin: &str, section: &OriginSection) -> Result<Self, ConfigError> {
        let start_strategy = match section.start_strategy.as_deref() {
            Some(name) => Some(Strategy::from_str(name).ok_or_else(|| {
                ConfigError::Invalid(format!("origin {}: unknown strategy '{}'", origin, name))
            })?),
            None => None,
        };
        if section.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "origin {}: max_concurrency must be at least 1",
                origin
            )));
        }

        Ok(Self {
            version: 1,
            paper_name: section
                .paper_name
                .clone()
                .unwrap_or_else(|| origin.to_string()),
            expected_language: section.expected_language.clone(),
            min_words: section.min_words.map(|n| n as usize),
            challenge_patterns: section.challenge_patterns.clone(),
            start_strategy,
            headline_selectors: section.headline_selectors.clone(),
            body_selectors: section.body_selectors.clone(),
            max_concurrency: section.max_concurrency.map(|n| n as usize),
        })
    }

    pub fn hints(&self) -> ExtractionHints {
        ExtractionHints {
            headline_selectors: self.headline_selectors.clone(),
            body_selectors: self.body_selectors.clone(),
        }
    }
}

/// Current configuration record per origin.
#[derive(Debug, Default)]
pub struct OriginConfigStore {
    entries: RwLock<HashMap<String, Arc<OriginConfig>>>,
}

impl OriginConfigStore {
    pub fn new(origins: HashMap<String, OriginConfig>) -> Self {
        Self {
            entries: RwLock::new(
                origins
                    .into_iter()
                    .map(|(k, v)| (k, Arc::new(v)))
                    .collect(),
            ),
        }
    }

    /// Snapshot of the origin's current record.
    pub async fn get(&self, origin: &str) -> Arc<OriginConfig> {
        if let Some(config) = self.entries.read().await.get(origin) {
            return config.clone();
        }
        Arc::new(OriginConfig::default_for(origin))
    }

    /// Replace an origin's record, returning the new version.
    ///
    /// Jobs already running keep the snapshot they started with.
    pub async fn replace(&self, origin: &str, mut config: OriginConfig) -> u64 {
        let mut entries = self.entries.write().await;
        let previous = entries.get(origin).map_or(0, |c| c.version);
        config.version = previous + 1;
        let version = config.version;
        entries.insert(origin.to_string(), Arc::new(config));
        info!("Origin {} configuration replaced (version {})", origin, version);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_origin_gets_default() {
        let store = OriginConfigStore::default();
        let config = store.get("example.com").await;
        assert_eq!(config.paper_name, "example.com");
        assert_eq!(config.version, 0);
    }

    #[tokio::test]
    async fn test_replace_bumps_version_and_keeps_snapshots() {
        let mut initial = OriginConfig::default_for("x.com");
        initial.version = 1;
        initial.paper_name = "X Times".into();
        let store = OriginConfigStore::new(HashMap::from([("x.com".to_string(), initial)]));

        let snapshot = store.get("x.com").await;
        let mut updated = (*snapshot).clone();
        updated.body_selectors = vec![".story".into()];
        assert_eq!(store.replace("x.com", updated).await, 2);

        assert!(snapshot.body_selectors.is_empty());
        let current = store.get("x.com").await;
        assert_eq!(current.version, 2);
        assert_eq!(current.body_selectors, vec![".story".to_string()]);
    }

    #[test]
    fn test_from_section() {
        let section = OriginSection {
            paper_name: Some("Daily Sun".into()),
            expected_language: Some("bn".into()),
            start_strategy: Some("stealth".into()),
            min_words: Some(40),
            ..Default::default()
        };
        let config = OriginConfig::from_section("daily-sun.com", &section).unwrap();
        assert_eq!(config.start_strategy, Some(Strategy::Stealth));
        assert_eq!(config.min_words, Some(40));
        assert_eq!(config.version, 1);

        let bad = OriginSection {
            start_strategy: Some("teleport".into()),
            ..Default::default()
        };
        assert!(OriginConfig::from_section("x", &bad).is_err());
    }
}
