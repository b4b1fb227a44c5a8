//! Plain and stealth HTTP fetchers on top of reqwest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy, Response};
use tracing::{debug, warn};

use super::proxy::{mask_proxy, normalize_proxy, ProxyPool};
use super::stealth::{stealth_headers, BrowserProfile};
use super::user_agent::resolve_user_agent;
use super::{FetchError, PageFetcher};
use crate::models::RawPage;

/// How requests from one fetcher are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProfile {
    /// Crawler user agent, no cookies.
    Plain,
    /// Rotated browser headers and a cookie jar shared across requests.
    Stealth,
}

fn extract_response_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Builder for [`HttpFetcher`].
pub struct HttpFetcherBuilder {
    profile: RequestProfile,
    timeout: Duration,
    user_agent: Option<String>,
    proxy: Option<String>,
    pool: Option<Arc<ProxyPool>>,
}

impl HttpFetcherBuilder {
    /// Set the user agent string for the plain profile.
    /// - `"impersonate"`: Use random real browser user agent
    /// - Any other string: Use as-is
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Route every request through one HTTP or SOCKS5 proxy.
    pub fn proxy(mut self, proxy_url: &str) -> Self {
        self.proxy = Some(proxy_url.to_string());
        self
    }

    /// Rotate requests across `pool`, taking precedence over [`proxy`](Self::proxy).
    pub fn proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    fn client(&self, user_agent: &str, proxy_url: Option<&str>) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .user_agent(user_agent)
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(self.profile == RequestProfile::Stealth);

        if let Some(proxy_url) = proxy_url {
            let proxy_url = normalize_proxy(proxy_url)?;
            let proxy = Proxy::all(&proxy_url).map_err(|e| {
                FetchError::Other(format!("Invalid proxy '{}': {}", mask_proxy(&proxy_url), e))
            })?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| FetchError::Other(format!("Failed to build HTTP client: {}", e)))
    }

    pub fn build(self) -> Result<HttpFetcher, FetchError> {
        let user_agent = resolve_user_agent(self.user_agent.as_deref());
        let client = self.client(&user_agent, self.proxy.as_deref())?;

        // One client per pooled proxy; reqwest binds the proxy at build time.
        let mut proxied = HashMap::new();
        if let Some(ref pool) = self.pool {
            for proxy in pool.proxies() {
                proxied.insert(proxy.clone(), self.client(&user_agent, Some(proxy))?);
            }
        }

        Ok(HttpFetcher {
            client,
            profile: self.profile,
            pool: self.pool,
            proxied,
        })
    }
}

/// reqwest-backed fetcher for the plain and stealth rungs.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    profile: RequestProfile,
    pool: Option<Arc<ProxyPool>>,
    proxied: HashMap<String, Client>,
}

impl HttpFetcher {
    pub fn builder(profile: RequestProfile, timeout: Duration) -> HttpFetcherBuilder {
        HttpFetcherBuilder {
            profile,
            timeout,
            user_agent: None,
            proxy: None,
            pool: None,
        }
    }

    pub fn profile(&self) -> RequestProfile {
        self.profile
    }

    pub fn proxy_pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    /// The next pooled proxy and its client, or the default client.
    fn pick(&self) -> (Option<String>, &Client) {
        let Some(proxy) = self.pool.as_ref().and_then(|pool| pool.next()) else {
            return (None, &self.client);
        };
        match self.proxied.get(&proxy) {
            Some(client) => (Some(proxy), client),
            None => (None, &self.client),
        }
    }

    async fn send(&self, client: &Client, url: &str) -> Result<RawPage, FetchError> {
        let mut request = client.get(url);
        if self.profile == RequestProfile::Stealth {
            request = request.headers(stealth_headers(BrowserProfile::random()));
        }

        let response = request.send().await.map_err(FetchError::from_reqwest)?;
        let status = response.status().as_u16();
        let headers = extract_response_headers(&response);
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(FetchError::from_reqwest)?;

        Ok(RawPage {
            status,
            headers,
            body,
            final_url,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let (proxy, client) = self.pick();
        let result = self.send(client, url).await;

        if let (Some(proxy), Some(pool)) = (proxy.as_deref(), self.pool.as_ref()) {
            let banned = match result {
                Ok(ref page) => pool.record_response(proxy, page.status, &page.body),
                Err(_) => pool.record_failure(proxy),
            };
            if banned {
                warn!("Proxy {} banned while fetching {}", mask_proxy(proxy), url);
            }
        }

        let page = result?;
        debug!(
            "{:?} fetch of {} returned {} ({} bytes)",
            self.profile,
            url,
            page.status,
            page.body.len()
        );
        Ok(page)
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ProxyRotation;

    #[test]
    fn test_rejects_unsupported_proxy_scheme() {
        let result = HttpFetcher::builder(RequestProfile::Plain, Duration::from_secs(5))
            .proxy("ftp://proxy:21")
            .build();
        assert!(matches!(result, Err(FetchError::Other(_))));

        let fetcher = HttpFetcher::builder(RequestProfile::Plain, Duration::from_secs(5))
            .proxy("proxy.internal:8080")
            .build();
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_pool_gets_one_client_per_proxy() {
        let pool = Arc::new(
            ProxyPool::new(
                ["10.0.0.1:8080", "socks5://10.0.0.2:1080"],
                ProxyRotation::RoundRobin,
                5,
            )
            .unwrap(),
        );
        let fetcher = HttpFetcher::builder(RequestProfile::Stealth, Duration::from_secs(5))
            .proxy_pool(pool)
            .build()
            .unwrap();
        assert_eq!(fetcher.proxied.len(), 2);

        let (first, _) = fetcher.pick();
        let (second, _) = fetcher.pick();
        assert_eq!(first.as_deref(), Some("http://10.0.0.1:8080"));
        assert_eq!(second.as_deref(), Some("socks5://10.0.0.2:1080"));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_counts_against_pool() {
        // Port 9 on localhost refuses connections.
        let pool = Arc::new(
            ProxyPool::new(["127.0.0.1:9"], ProxyRotation::RoundRobin, 1).unwrap(),
        );
        let fetcher = HttpFetcher::builder(RequestProfile::Stealth, Duration::from_secs(5))
            .proxy_pool(pool.clone())
            .build()
            .unwrap();

        assert!(fetcher.fetch("http://news.invalid/a").await.is_err());
        assert!(pool.is_banned("http://127.0.0.1:9"));
    }

    #[test]
    fn test_builds_both_profiles() {
        for profile in [RequestProfile::Plain, RequestProfile::Stealth] {
            let fetcher = HttpFetcher::builder(profile, Duration::from_secs(5))
                .user_agent("TestBot/1.0")
                .build()
                .unwrap();
            assert_eq!(fetcher.profile(), profile);
        }
    }
}
