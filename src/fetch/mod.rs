//! Fetch strategies: one backend per rung of the escalation ladder.
//!
//! Dispatch is a flat table keyed by [`Strategy`]. Rungs without a backend
//! are reported as unavailable and skipped by escalation.

mod archive;
mod browser;
mod http;
mod proxy;
mod stealth;
mod user_agent;

pub use archive::{ArchiveError, ArchiveSource, Snapshot, WaybackArchive};
#[cfg(feature = "browser")]
pub use browser::ChromeRenderer;
pub use browser::{BrowserError, BrowserRenderer};
pub use http::{HttpFetcher, HttpFetcherBuilder, RequestProfile};
pub use proxy::{
    is_ban_response, mask_proxy, normalize_proxy, parse_proxy_list, ProxyPool, ProxyRotation,
    DEFAULT_BAN_THRESHOLD,
};
pub use stealth::{stealth_headers, BrowserProfile, ACCEPT_LANGUAGES};
pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;
use crate::models::{RawPage, Strategy};
use crate::resilience::NetworkFailure;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("strategy {0} is not available")]
    Unavailable(Strategy),
    #[error("no archived copy of {0}")]
    NotArchived(String),
    #[error("browser rendering failed: {0}")]
    Rendering(String),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() {
            Self::Connection(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }

    /// Network failure kind for the retry policy, or `None` when the error
    /// is a rung-level problem that escalation handles instead.
    pub fn network_failure(&self) -> Option<NetworkFailure> {
        match self {
            Self::Timeout => Some(NetworkFailure::Timeout),
            Self::Connection(_) => Some(NetworkFailure::Connection),
            Self::Other(_) => Some(NetworkFailure::Other),
            Self::Unavailable(_) | Self::NotArchived(_) | Self::Rendering(_) => None,
        }
    }
}

impl From<BrowserError> for FetchError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::Unavailable => Self::Unavailable(Strategy::Browser),
            BrowserError::Timeout(_) => Self::Timeout,
            other => Self::Rendering(other.to_string()),
        }
    }
}

impl From<ArchiveError> for FetchError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Timeout => Self::Timeout,
            ArchiveError::Http(msg) => Self::Connection(msg),
            ArchiveError::Parse(msg) => Self::Other(msg),
        }
    }
}

/// Fetches one URL over HTTP.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError>;
}

/// Backends for each rung.
#[derive(Clone)]
pub struct StrategyTable {
    plain: Arc<dyn PageFetcher>,
    stealth: Option<Arc<dyn PageFetcher>>,
    browser: Option<Arc<dyn BrowserRenderer>>,
    archive: Option<Arc<dyn ArchiveSource>>,
}

impl StrategyTable {
    pub fn new(plain: Arc<dyn PageFetcher>) -> Self {
        Self {
            plain,
            stealth: None,
            browser: None,
            archive: None,
        }
    }

    pub fn with_stealth(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.stealth = Some(fetcher);
        self
    }

    pub fn with_browser(mut self, renderer: Arc<dyn BrowserRenderer>) -> Self {
        self.browser = Some(renderer);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveSource>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Build the production table from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let mut plain = HttpFetcher::builder(RequestProfile::Plain, settings.request_timeout);
        let mut stealth = HttpFetcher::builder(RequestProfile::Stealth, settings.request_timeout);
        if let Some(ref ua) = settings.user_agent {
            plain = plain.user_agent(ua);
        }
        if let Some(ref proxy) = settings.proxy {
            plain = plain.proxy(proxy);
            stealth = stealth.proxy(proxy);
        }
        if !settings.proxies.is_empty() {
            let pool = ProxyPool::new(
                &settings.proxies,
                settings.proxy_rotation,
                settings.proxy_ban_threshold,
            )?;
            tracing::info!(
                "Stealth rung rotating {} proxies ({})",
                pool.proxies().len(),
                pool.rotation()
            );
            stealth = stealth.proxy_pool(Arc::new(pool));
        }

        let mut table =
            Self::new(Arc::new(plain.build()?)).with_stealth(Arc::new(stealth.build()?));

        if settings.archive_enabled {
            table = table.with_archive(Arc::new(WaybackArchive::new(settings.request_timeout)?));
        }

        #[cfg(feature = "browser")]
        if settings.browser_enabled {
            table = table.with_browser(Arc::new(ChromeRenderer::new(
                settings.browser_url.clone(),
                settings.browser_timeout,
            )));
        }

        Ok(table)
    }

    /// Rungs that have a backend.
    pub fn available(&self) -> Vec<Strategy> {
        Strategy::LADDER
            .into_iter()
            .filter(|s| match s {
                Strategy::Plain => true,
                Strategy::Stealth => self.stealth.is_some(),
                Strategy::Browser => self.browser.is_some(),
                Strategy::Archive => self.archive.is_some(),
            })
            .collect()
    }

    /// Fetch `url` with the backend for `strategy`.
    pub async fn dispatch(&self, strategy: Strategy, url: &str) -> Result<RawPage, FetchError> {
        match strategy {
            Strategy::Plain => self.plain.fetch(url).await,
            Strategy::Stealth => match self.stealth {
                Some(ref f) => f.fetch(url).await,
                None => Err(FetchError::Unavailable(strategy)),
            },
            Strategy::Browser => match self.browser {
                Some(ref b) => Ok(b.render(url).await?),
                None => Err(FetchError::Unavailable(strategy)),
            },
            Strategy::Archive => match self.archive {
                Some(ref a) => a
                    .fetch_archived(url)
                    .await?
                    .ok_or_else(|| FetchError::NotArchived(url.to_string())),
                None => Err(FetchError::Unavailable(strategy)),
            },
        }
    }
}

impl std::fmt::Debug for StrategyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyTable")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl PageFetcher for Fixed {
        async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
            Ok(RawPage::new(200, self.0).with_final_url(url))
        }
    }

    struct NoSnapshots;

    #[async_trait]
    impl ArchiveSource for NoSnapshots {
        async fn fetch_archived(&self, _url: &str) -> Result<Option<RawPage>, ArchiveError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_rung() {
        let table = StrategyTable::new(Arc::new(Fixed("plain")))
            .with_stealth(Arc::new(Fixed("stealth")))
            .with_archive(Arc::new(NoSnapshots));

        assert_eq!(
            table.available(),
            vec![Strategy::Plain, Strategy::Stealth, Strategy::Archive]
        );
        let page = table.dispatch(Strategy::Stealth, "https://a.com/x").await.unwrap();
        assert_eq!(page.body, "stealth");
        assert!(matches!(
            table.dispatch(Strategy::Browser, "https://a.com/x").await,
            Err(FetchError::Unavailable(Strategy::Browser))
        ));
        assert!(matches!(
            table.dispatch(Strategy::Archive, "https://a.com/x").await,
            Err(FetchError::NotArchived(_))
        ));
    }

    #[test]
    fn test_network_failure_mapping() {
        assert_eq!(
            FetchError::Timeout.network_failure(),
            Some(NetworkFailure::Timeout)
        );
        assert_eq!(
            FetchError::Connection("reset".into()).network_failure(),
            Some(NetworkFailure::Connection)
        );
        assert_eq!(FetchError::Rendering("x".into()).network_failure(), None);
        assert!(matches!(
            FetchError::from(BrowserError::Unavailable),
            FetchError::Unavailable(Strategy::Browser)
        ));
    }
}
