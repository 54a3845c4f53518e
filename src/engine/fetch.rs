// src/engine/fetch.rs
// =============================================================================
// Downloading pages.
//
// The engine only needs "give me the decoded bytes at this URL", expressed by
// the Fetcher trait. HttpFetcher is the real implementation:
// - GET only
// - optional proxy rotation (one reqwest Client per proxy, built once)
// - optional random User-Agent per request
// - anything other than 200 OK is an error
// - the body is decoded to UTF-8 (see charset.rs)
//
// Tests and embedders can plug in their own Fetcher.
// =============================================================================

use super::charset::decode_body;
use crate::error::{CrawlError, FetchError};
use crate::proxy::ProxyRotator;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::trace;

/// Something that can download a page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the page body, decoded to UTF-8.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

const DEFAULT_USER_AGENT: &str = concat!("depthcrawl/", env!("CARGO_PKG_VERSION"));

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// Picks one of a handful of common browser User-Agent strings.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

#[derive(Debug)]
pub struct HttpFetcher {
    direct: Client,
    // One client per proxy, same order as the rotator's list
    proxied: Vec<Client>,
    rotator: Option<ProxyRotator>,
    random_user_agent: bool,
}

impl HttpFetcher {
    pub fn new(
        timeout: Duration,
        rotator: Option<ProxyRotator>,
        random_user_agent: bool,
    ) -> Result<Self, CrawlError> {
        // Proxies are configured explicitly; HTTP_PROXY & co. are ignored
        let direct = base_client(timeout)
            .no_proxy()
            .build()
            .map_err(CrawlError::Client)?;

        let proxied = match &rotator {
            Some(rotator) => rotator
                .proxies()
                .iter()
                .map(|url| {
                    let proxy = reqwest::Proxy::all(url.as_str()).map_err(CrawlError::Client)?;
                    base_client(timeout)
                        .proxy(proxy)
                        .build()
                        .map_err(CrawlError::Client)
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(HttpFetcher {
            direct,
            proxied,
            rotator,
            random_user_agent,
        })
    }

    // Rotates through the proxy clients, or uses the direct one.
    fn client(&self) -> &Client {
        match &self.rotator {
            Some(rotator) if !self.proxied.is_empty() => {
                let index = rotator.next_index();
                trace!(proxy = %rotator.proxies()[index], "using proxy");
                &self.proxied[index]
            }
            _ => &self.direct,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client().get(url);
        if self.random_user_agent {
            request = request.header(USER_AGENT, random_user_agent());
        }

        let response = request.send().await.map_err(FetchError::Network)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status { status });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(FetchError::Body)?;
        Ok(decode_body(body.to_vec(), content_type.as_deref()))
    }
}

fn base_client(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(DEFAULT_USER_AGENT)
}
