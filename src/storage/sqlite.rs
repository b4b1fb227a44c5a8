//! SQLite article sink.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{ArticleSink, PersistOutcome, StorageError, StorageResult};
use crate::models::ArticleRecord;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        canonical_url TEXT NOT NULL UNIQUE,
        paper_name TEXT NOT NULL,
        headline TEXT NOT NULL,
        body TEXT NOT NULL,
        author TEXT,
        published_at TEXT,
        category TEXT,
        image_url TEXT,
        detected_language TEXT,
        word_count INTEGER NOT NULL,
        reading_time_minutes INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        fallback_level TEXT NOT NULL,
        confidence REAL NOT NULL,
        low_confidence INTEGER NOT NULL DEFAULT 0,
        strategy_used TEXT,
        scraped_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_articles_content_hash ON articles(content_hash);
    CREATE INDEX IF NOT EXISTS idx_articles_paper ON articles(paper_name);
"#;

#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Task(format!("creating {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 30000;
        "#,
        )?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened article database {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ArticleSink for SqliteSink {
    async fn persist(&self, record: &ArticleRecord) -> StorageResult<PersistOutcome> {
        let r = record.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                r#"INSERT OR IGNORE INTO articles (
                    canonical_url, paper_name, headline, body, author, published_at,
                    category, image_url, detected_language, word_count,
                    reading_time_minutes, content_hash, fallback_level, confidence,
                    low_confidence, strategy_used
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
                params![
                    r.canonical_url,
                    r.paper_name,
                    r.headline,
                    r.body,
                    r.author,
                    r.published_at,
                    r.category,
                    r.image_url,
                    r.detected_language,
                    r.word_count as i64,
                    r.reading_time_minutes,
                    r.content_hash,
                    r.fallback_level.as_str(),
                    f64::from(r.confidence),
                    r.low_confidence,
                    r.strategy_used.map(|s| s.as_str()),
                ],
            )?;
            Ok(if changed == 0 {
                PersistOutcome::DuplicateIgnored
            } else {
                PersistOutcome::Inserted
            })
        })
        .await
    }

    async fn find_by_content_hash(&self, hash: &str) -> StorageResult<Option<String>> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT canonical_url FROM articles WHERE content_hash = ?1 ORDER BY id LIMIT 1",
                    params![hash],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn count(&self) -> StorageResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }
}
