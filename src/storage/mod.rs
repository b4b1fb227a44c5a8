//! Persistence boundary for validated articles.
//!
//! Every record is keyed by its canonical URL. Persisting a URL that is
//! already stored is not an error: the sink reports `DuplicateIgnored`
//! and leaves the stored record untouched.

mod memory;
mod sqlite;

pub use memory::InMemorySink;
pub use sqlite::SqliteSink;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::ArticleRecord;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Inserted,
    DuplicateIgnored,
}

/// Storage collaborator consuming validated records.
#[async_trait]
pub trait ArticleSink: Send + Sync {
    /// Store a record unless its canonical URL is already present.
    async fn persist(&self, record: &ArticleRecord) -> StorageResult<PersistOutcome>;

    /// Canonical URL of a stored record with the same content hash, if any.
    async fn find_by_content_hash(&self, hash: &str) -> StorageResult<Option<String>>;

    async fn count(&self) -> StorageResult<usize>;
}
