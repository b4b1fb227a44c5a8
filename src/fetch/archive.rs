//! Archived-copy collaborator backed by the Wayback Machine.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::user_agent::USER_AGENT;
use crate::models::RawPage;

pub const WAYBACK_CDX_API_URL: &str = "https://web.archive.org/cdx/search/cdx";
pub const WAYBACK_WEB_URL: &str = "https://web.archive.org/web";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive request timed out")]
    Timeout,
    #[error("archive request failed: {0}")]
    Http(String),
    #[error("unexpected archive response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ArchiveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Fetches a historical copy of a page.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// `Ok(None)` means no snapshot exists.
    async fn fetch_archived(&self, url: &str) -> Result<Option<RawPage>, ArchiveError>;
}

/// A capture found in the CDX index.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: String,
    pub original_url: String,
    pub captured_at: DateTime<Utc>,
}

/// Wayback Machine client: newest successful capture, fetched raw.
pub struct WaybackArchive {
    client: Client,
    cdx_url: String,
    web_url: String,
}

impl WaybackArchive {
    pub fn new(timeout: Duration) -> Result<Self, ArchiveError> {
        Self::with_endpoints(timeout, WAYBACK_CDX_API_URL, WAYBACK_WEB_URL)
    }

    /// Use alternative endpoints (mirrors, test servers).
    pub fn with_endpoints(
        timeout: Duration,
        cdx_url: impl Into<String>,
        web_url: impl Into<String>,
    ) -> Result<Self, ArchiveError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            cdx_url: cdx_url.into(),
            web_url: web_url.into(),
        })
    }

    /// Parse a CDX timestamp (YYYYMMDDhhmmss) into DateTime<Utc>.
    fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
        if ts.len() < 14 || !ts.is_char_boundary(14) {
            return None;
        }
        NaiveDateTime::parse_from_str(&ts[..14], "%Y%m%d%H%M%S")
            .ok()
            .map(|dt| dt.and_utc())
    }

    /// Raw capture URL, without the Wayback toolbar.
    pub fn raw_capture_url(&self, snapshot: &Snapshot) -> String {
        format!(
            "{}/{}id_/{}",
            self.web_url.trim_end_matches('/'),
            snapshot.timestamp,
            snapshot.original_url
        )
    }

    /// Parse the JSON CDX output: a header row followed by
    /// `[timestamp, original, statuscode]` rows. Returns the newest capture.
    pub fn parse_cdx(body: &str) -> Result<Option<Snapshot>, ArchiveError> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let rows: Vec<Vec<String>> =
            serde_json::from_str(trimmed).map_err(|e| ArchiveError::Parse(e.to_string()))?;

        let newest = rows
            .iter()
            .skip(1)
            .filter(|row| row.len() >= 3 && row[2] == "200")
            .filter_map(|row| {
                Self::parse_timestamp(&row[0]).map(|captured_at| Snapshot {
                    timestamp: row[0].clone(),
                    original_url: row[1].clone(),
                    captured_at,
                })
            })
            .max_by_key(|s| s.captured_at);
        Ok(newest)
    }

    async fn latest_snapshot(&self, url: &str) -> Result<Option<Snapshot>, ArchiveError> {
        let query = Url::parse_with_params(
            &self.cdx_url,
            &[
                ("url", url),
                ("output", "json"),
                ("fl", "timestamp,original,statuscode"),
                ("filter", "statuscode:200"),
                ("limit", "-5"),
            ],
        )
        .map_err(|e| ArchiveError::Parse(e.to_string()))?;

        let body = self
            .client
            .get(query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Self::parse_cdx(&body)
    }
}

#[async_trait]
impl ArchiveSource for WaybackArchive {
    async fn fetch_archived(&self, url: &str) -> Result<Option<RawPage>, ArchiveError> {
        let Some(snapshot) = self.latest_snapshot(url).await? else {
            debug!("No Wayback snapshot for {}", url);
            return Ok(None);
        };

        let capture_url = self.raw_capture_url(&snapshot);
        debug!("Fetching Wayback capture {}", capture_url);
        let response = self.client.get(&capture_url).send().await?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        let body = response.error_for_status()?.text().await?;

        // The original URL stays the document's identity.
        Ok(Some(RawPage::new(status, body).with_final_url(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cdx_picks_newest_ok_capture() {
        let body = r#"[["timestamp","original","statuscode"],
            ["20230101120000","https://example.com/a","200"],
            ["20240301080000","https://example.com/a","200"],
            ["20240401080000","https://example.com/a","404"]]"#;
        let snap = WaybackArchive::parse_cdx(body).unwrap().unwrap();
        assert_eq!(snap.timestamp, "20240301080000");

        let archive = WaybackArchive::new(Duration::from_secs(5)).unwrap();
        assert_eq!(
            archive.raw_capture_url(&snap),
            "https://web.archive.org/web/20240301080000id_/https://example.com/a"
        );
    }

    #[test]
    fn test_parse_cdx_empty() {
        assert_eq!(WaybackArchive::parse_cdx("").unwrap(), None);
        assert_eq!(WaybackArchive::parse_cdx("[]").unwrap(), None);
        assert!(WaybackArchive::parse_cdx("<html>").is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        let dt = WaybackArchive::parse_timestamp("20240115143022").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-15 14:30:22");
        assert!(WaybackArchive::parse_timestamp("2024").is_none());
    }
}
