//! Browser rendering collaborator.
//!
//! The resilience layer treats rendering as an opaque, slower fetch. The
//! Chromium implementation is only compiled with the `browser` feature.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::RawPage;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser rendering is not configured")]
    Unavailable,
    #[error("browser timed out rendering {0}")]
    Timeout(String),
    #[error("failed to connect to browser: {0}")]
    Connect(String),
    #[error("rendering failed: {0}")]
    Render(String),
}

/// Renders a URL with JavaScript execution and returns the final document.
#[async_trait]
pub trait BrowserRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RawPage, BrowserError>;
}

#[cfg(feature = "browser")]
pub use chrome::ChromeRenderer;

#[cfg(feature = "browser")]
mod chrome {
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
    use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::OnceCell;
    use tracing::{debug, info};

    use super::{BrowserError, BrowserRenderer};
    use crate::fetch::user_agent::{random_from, CHROME_USER_AGENTS};
    use crate::models::RawPage;

    /// Evasion scripts injected once the page is ready.
    const STEALTH_SCRIPTS: &[&str] = &[
        r#"Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });"#,
        r#"window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };"#,
        r#"Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en', 'bn'], configurable: true });"#,
        r#"Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3], configurable: true });"#,
    ];

    /// JavaScript to wait for page ready state.
    const WAIT_FOR_READY_SCRIPT: &str = r#"
        new Promise((resolve) => {
            if (document.readyState === 'complete' || document.readyState === 'interactive') {
                resolve(document.readyState);
            } else {
                document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                setTimeout(() => resolve('timeout'), 10000);
            }
        })
    "#;

    /// Chromium over the DevTools protocol, remote or locally launched.
    pub struct ChromeRenderer {
        remote_url: Option<String>,
        timeout: Duration,
        browser: OnceCell<Browser>,
    }

    impl ChromeRenderer {
        /// `remote_url` is a DevTools HTTP endpoint (`http://host:9222`);
        /// without it a local headless Chrome is launched on first use.
        pub fn new(remote_url: Option<String>, timeout: Duration) -> Self {
            Self {
                remote_url,
                timeout,
                browser: OnceCell::new(),
            }
        }

        async fn browser(&self) -> Result<&Browser, BrowserError> {
            self.browser
                .get_or_try_init(|| async {
                    match self.remote_url.as_deref() {
                        Some(url) => connect_remote(url, self.timeout).await,
                        None => launch_local().await,
                    }
                })
                .await
        }

        async fn render_on(&self, page: &Page, url: &str) -> Result<RawPage, BrowserError> {
            page.execute(SetUserAgentOverrideParams::new(
                random_from(CHROME_USER_AGENTS).to_string(),
            ))
            .await
            .map_err(|e| BrowserError::Render(e.to_string()))?;

            let nav = NavigateParams::builder()
                .url(url)
                .build()
                .map_err(|e| BrowserError::Render(format!("Invalid URL: {}", e)))?;
            tokio::time::timeout(self.timeout, page.execute(nav))
                .await
                .map_err(|_| BrowserError::Timeout(url.to_string()))?
                .map_err(|e| BrowserError::Render(format!("Navigation failed: {}", e)))?;

            match tokio::time::timeout(
                self.timeout,
                page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
            )
            .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("Could not check ready state: {}", e),
                Err(_) => return Err(BrowserError::Timeout(url.to_string())),
            }

            for script in STEALTH_SCRIPTS {
                if let Err(e) = page.evaluate(script.to_string()).await {
                    debug!("Stealth script injection skipped: {}", e);
                }
            }

            let final_url = page
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| url.to_string());
            let body = page
                .content()
                .await
                .map_err(|e| BrowserError::Render(e.to_string()))?;

            Ok(RawPage::new(200, body).with_final_url(final_url))
        }
    }

    #[async_trait]
    impl BrowserRenderer for ChromeRenderer {
        async fn render(&self, url: &str) -> Result<RawPage, BrowserError> {
            let browser = self.browser().await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| BrowserError::Render(e.to_string()))?;
            let result = self.render_on(&page, url).await;
            let _ = page.close().await;
            result
        }
    }

    async fn connect_remote(url: &str, timeout: Duration) -> Result<Browser, BrowserError> {
        info!("Connecting to remote browser at {}", url);
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BrowserError::Connect(e.to_string()))?
            .json()
            .await
            .map_err(|e| BrowserError::Connect(format!("bad version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::Connect("No webSocketDebuggerUrl in response".into()))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: timeout,
            ..Default::default()
        };
        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| BrowserError::Connect(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        Ok(browser)
    }

    async fn launch_local() -> Result<Browser, BrowserError> {
        info!("Launching headless browser");
        let config = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .build()
            .map_err(|e| BrowserError::Connect(format!("bad browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Connect(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        Ok(browser)
    }
}
