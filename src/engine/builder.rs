// src/engine/builder.rs
// =============================================================================
// Building an Engine.
//
// EngineBuilder takes named options one call at a time; EngineConfig is the
// same set of options as plain data, so it can come from a TOML file or the
// command line. Everything that can be checked up front (proxy URLs, worker
// count) is checked in build(), so a bad setup fails before any request.
// =============================================================================

use super::events::CrawlEvent;
use super::fetch::{Fetcher, HttpFetcher};
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::Engine;
use crate::context::Context;
use crate::error::CrawlError;
use crate::model::Item;
use crate::proxy::ProxyRotator;
use crate::scheduler::{Scheduler, SchedulerKind};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Engine options as plain data.
///
/// Every field has a default, so a config file only needs the fields it
/// wants to change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub workers: usize,
    /// Requests per second across all workers; 0 means unlimited
    pub qps: u32,
    /// Deepest level to crawl, seeds being 1; 0 means unlimited
    pub max_depth: usize,
    /// Empty means no proxy
    pub proxies: Vec<String>,
    pub random_user_agent: bool,
    pub scheduler: SchedulerKind,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_status: bool,
    pub pipeline_buffer: usize,
    pub stop_when_idle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let retry = RetryPolicy::none();
        EngineConfig {
            workers: 1,
            qps: 0,
            max_depth: 0,
            proxies: Vec::new(),
            random_user_agent: true,
            scheduler: SchedulerKind::default(),
            request_timeout_secs: 30,
            max_retries: retry.max_retries,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
            retry_status: retry.retry_status,
            pipeline_buffer: 1024,
            stop_when_idle: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, CrawlError> {
        toml::from_str(s).map_err(|e| CrawlError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CrawlError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
        .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
        .with_retry_status(self.retry_status)
    }
}

pub struct EngineBuilder {
    workers: usize,
    qps: u32,
    max_depth: usize,
    proxies: Option<Vec<String>>,
    random_user_agent: bool,
    request_timeout: Duration,
    scheduler: SchedulerKind,
    retry: RetryPolicy,
    pipeline: Option<mpsc::Sender<Item>>,
    pipeline_buffer: usize,
    events: Option<mpsc::UnboundedSender<CrawlEvent>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    cancel: Option<CancellationToken>,
    stop_when_idle: bool,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::from_config(&EngineConfig::default())
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        EngineBuilder {
            workers: config.workers,
            qps: config.qps,
            max_depth: config.max_depth,
            proxies: (!config.proxies.is_empty()).then(|| config.proxies.clone()),
            random_user_agent: config.random_user_agent,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            scheduler: config.scheduler,
            retry: config.retry_policy(),
            pipeline: None,
            pipeline_buffer: config.pipeline_buffer,
            events: None,
            fetcher: None,
            cancel: None,
            stop_when_idle: config.stop_when_idle,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn qps(mut self, qps: u32) -> Self {
        self.qps = qps;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Routes requests through these proxies in turn. An empty list is an
    /// error at build time.
    pub fn proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxies = Some(proxies.into_iter().map(Into::into).collect());
        self
    }

    pub fn random_user_agent(mut self, enabled: bool) -> Self {
        self.random_user_agent = enabled;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.scheduler = kind;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Where extracted items go.
    ///
    /// Delivery is fire-and-forget: `run()` returns without waiting for the
    /// consumer, and items still queued keep arriving afterwards until the
    /// channel is closed (drop the engine to close it). Only the
    /// `pipeline_buffer` queue absorbs a consumer that isn't reading yet;
    /// beyond that the crawl waits for room. Cancelling the engine drops
    /// undelivered items.
    pub fn pipeline(mut self, pipeline: mpsc::Sender<Item>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// How many items may wait between the engine and the pipeline.
    pub fn pipeline_buffer(mut self, size: usize) -> Self {
        self.pipeline_buffer = size;
        self
    }

    pub fn events(mut self, events: mpsc::UnboundedSender<CrawlEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replaces the HTTP fetcher. Proxy and User-Agent options only apply
    /// to the built-in one.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// With `false`, run() only returns once cancelled.
    pub fn stop_when_idle(mut self, stop: bool) -> Self {
        self.stop_when_idle = stop;
        self
    }

    pub fn build(self) -> Result<Engine, CrawlError> {
        if self.workers == 0 {
            return Err(CrawlError::Config("worker count must be at least 1".into()));
        }
        if self.pipeline_buffer == 0 {
            return Err(CrawlError::Config("pipeline buffer must be at least 1".into()));
        }

        let rotator = self.proxies.map(ProxyRotator::new).transpose()?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => {
                if rotator.is_some() {
                    debug!("custom fetcher set; proxy list is ignored");
                }
                fetcher
            }
            None => Arc::new(HttpFetcher::new(
                self.request_timeout,
                rotator,
                self.random_user_agent,
            )?),
        };

        Ok(Engine {
            ctx: Arc::new(Context::with_max_depth(self.max_depth)),
            scheduler: Scheduler::new(self.scheduler),
            workers: self.workers,
            fetcher,
            rate_limiter: RateLimiter::new(self.qps).map(Arc::new),
            pipeline: self.pipeline,
            pipeline_buffer: self.pipeline_buffer,
            events: self.events,
            retry: self.retry,
            stop_when_idle: self.stop_when_idle,
            cancel: self.cancel.unwrap_or_default(),
            started: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
