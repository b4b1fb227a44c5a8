//! Core data models for news acquisition.

mod article;
mod crawl;
mod fetch;

pub use article::{ArticleRecord, Confidence, ExtractionResult, FallbackLevel};
pub use crawl::{CrawlJob, CrawlTarget, JobFilter};
pub use fetch::{FetchOutcome, RawPage, StatusClass, Strategy};
