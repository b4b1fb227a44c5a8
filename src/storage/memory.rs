//! In-process sink, used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ArticleSink, PersistOutcome, StorageResult};
use crate::models::ArticleRecord;

#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<HashMap<String, ArticleRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, canonical_url: &str) -> Option<ArticleRecord> {
        self.records.lock().await.get(canonical_url).cloned()
    }

    /// All stored records, ordered by canonical URL.
    pub async fn records(&self) -> Vec<ArticleRecord> {
        let mut all: Vec<_> = self.records.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.canonical_url.cmp(&b.canonical_url));
        all
    }
}

#[async_trait]
impl ArticleSink for InMemorySink {
    async fn persist(&self, record: &ArticleRecord) -> StorageResult<PersistOutcome> {
        // Check and insert under one lock so concurrent writers of the same
        // URL cannot both insert.
        let mut records = self.records.lock().await;
        if records.contains_key(&record.canonical_url) {
            return Ok(PersistOutcome::DuplicateIgnored);
        }
        records.insert(record.canonical_url.clone(), record.clone());
        Ok(PersistOutcome::Inserted)
    }

    async fn find_by_content_hash(&self, hash: &str) -> StorageResult<Option<String>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.content_hash == hash)
            .map(|r| r.canonical_url.clone())
            .min())
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(self.records.lock().await.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::FallbackLevel;

    pub(crate) fn record(url: &str, body: &str) -> ArticleRecord {
        ArticleRecord {
            canonical_url: url.to_string(),
            paper_name: "Example Daily".to_string(),
            headline: "Flood warning issued".to_string(),
            body: body.to_string(),
            author: None,
            published_at: Some("2024-03-05T00:00:00+00:00".to_string()),
            category: None,
            image_url: None,
            detected_language: Some("en".to_string()),
            word_count: body.split_whitespace().count(),
            reading_time_minutes: 1,
            content_hash: crate::utils::content_hash(body),
            fallback_level: FallbackLevel::Structured,
            confidence: 0.95,
            low_confidence: false,
            strategy_used: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_url_ignored() {
        let sink = InMemorySink::new();
        let first = record("https://x.com/a", "first body");
        let mut second = record("https://x.com/a", "second body");
        second.headline = "Changed".into();

        assert_eq!(sink.persist(&first).await.unwrap(), PersistOutcome::Inserted);
        assert_eq!(
            sink.persist(&second).await.unwrap(),
            PersistOutcome::DuplicateIgnored
        );
        assert_eq!(sink.count().await.unwrap(), 1);
        assert_eq!(sink.get("https://x.com/a").await.unwrap().body, "first body");
    }

    #[tokio::test]
    async fn test_concurrent_same_url() {
        let sink = Arc::new(InMemorySink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                tokio::spawn(async move { sink.persist(&record("https://x.com/a", "b")).await })
            })
            .collect();

        let mut inserted = 0;
        for h in handles {
            if h.await.unwrap().unwrap() == PersistOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(sink.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_content_hash() {
        let sink = InMemorySink::new();
        let r = record("https://x.com/a", "same body");
        sink.persist(&r).await.unwrap();
        assert_eq!(
            sink.find_by_content_hash(&r.content_hash).await.unwrap().as_deref(),
            Some("https://x.com/a")
        );
        assert!(sink.find_by_content_hash("nope").await.unwrap().is_none());
    }
}
