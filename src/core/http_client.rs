use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_core::models::proxy::ProxyEntry;

use crate::core::direct_downloader;

/// Per-request knobs for page and file fetches.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub proxy: Option<ProxyEntry>,
}

impl PageRequest {
    pub fn with_user_agent(ua: &str) -> Self {
        Self {
            user_agent: Some(ua.to_string()),
            ..Self::default()
        }
    }

    pub fn referer(mut self, referer: &str) -> Self {
        self.referer = Some(referer.to_string());
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxyEntry>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Plain HTTP access used by the scrape fallback, the image fallback and proxy
/// liveness checks.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str, req: &PageRequest) -> anyhow::Result<String>;

    async fn fetch_file(&self, url: &str, output: &Path, req: &PageRequest) -> anyhow::Result<u64>;

    /// True when `url` answers with a 2xx through `proxy` within `timeout`.
    async fn probe(&self, url: &str, proxy: &ProxyEntry, timeout: Duration) -> bool;
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: Option<&ProxyEntry>,
) -> reqwest::ClientBuilder {
    let Some(proxy) = proxy else {
        return builder;
    };
    match reqwest::Proxy::all(proxy.to_url()) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("invalid proxy URL {}: {}", proxy, e);
            builder
        }
    }
}

pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, req: &PageRequest, timeout: Duration) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(ua) = &req.user_agent {
            builder = builder.user_agent(ua.as_str());
        }
        builder = apply_proxy(builder, req.proxy.as_ref());
        Ok(builder.build()?)
    }

    fn headers(req: &PageRequest) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(referer) = &req.referer {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(referer) {
                headers.insert(reqwest::header::REFERER, value);
            }
        }
        headers
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str, req: &PageRequest) -> anyhow::Result<String> {
        let client = self.client(req, self.timeout)?;
        let response = client
            .get(url)
            .headers(Self::headers(req))
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} fetching {}", status.as_u16(), url);
        }
        Ok(response.text().await?)
    }

    async fn fetch_file(&self, url: &str, output: &Path, req: &PageRequest) -> anyhow::Result<u64> {
        let client = self.client(req, self.timeout * 4)?;
        direct_downloader::download_direct(&client, url, output, Some(Self::headers(req))).await
    }

    async fn probe(&self, url: &str, proxy: &ProxyEntry, timeout: Duration) -> bool {
        let req = PageRequest::default().proxy(Some(proxy.clone()));
        let client = match self.client(&req, timeout) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("cannot build client for {}: {}", proxy, e);
                return false;
            }
        };
        match client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("proxy {} failed liveness check: {}", proxy, e);
                false
            }
        }
    }
}
