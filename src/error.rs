// src/error.rs
// =============================================================================
// Error types for the crawl engine.
//
// Three families:
// - Configuration errors (bad proxy list, zero workers) fail at build time
// - Fetch errors (network, non-2xx status, unreadable body) end one task
// - Control signals (max depth reached) quietly stop one branch of the crawl
//
// The binary wraps all of these in anyhow; the library keeps them typed so
// callers can match on what went wrong.
// =============================================================================

use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while building or running an engine.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The task is deeper than the configured max depth.
    #[error("max depth limit reached: depth {depth} > max {max}")]
    MaxDepth { depth: usize, max: usize },

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The parse function panicked while handling a response.
    #[error("parse function panicked on {url}: {message}")]
    ParsePanic { url: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("engine is already running")]
    AlreadyRunning,
}

/// Errors from constructing a proxy rotator.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy URL list is empty")]
    Empty,

    #[error("invalid proxy URL '{url}': {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Errors from fetching a single page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS, TLS, timeout or redirect failure.
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// The server answered, but not with a 2xx status.
    #[error("HTTP {status}")]
    Status { status: StatusCode },

    /// Headers arrived but the body could not be read.
    #[error("failed to read body: {0}")]
    Body(#[source] reqwest::Error),
}

impl FetchError {
    // Network trouble is always worth another try; statuses only when the
    // server told us it was overloaded or broken.
    pub fn is_retryable(&self, retry_status: bool) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Body(_) => true,
            FetchError::Status { status } => {
                retry_status
                    && (status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS)
            }
        }
    }
}

impl CrawlError {
    /// True for the depth signal, which is not a fault.
    pub fn is_max_depth(&self) -> bool {
        matches!(self, CrawlError::MaxDepth { .. })
    }
}
