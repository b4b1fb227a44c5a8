//! newsacquire - resilient news article acquisition.
//!
//! Turns crawl jobs for many independent, often hostile, news sites into a
//! stream of validated article records. Requests pass through circuit
//! breaking, adaptive throttling, retries and a strategy ladder (plain,
//! stealth, browser, archive); documents pass through a cascading
//! extraction chain and a quality gate before reaching the storage sink.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod resilience;
pub mod storage;
pub mod utils;
pub mod validate;
