// src/engine/events.rs
// =============================================================================
// What happened to each task, as data.
//
// Every fetch, failure, dropped duplicate and depth cut-off is logged with
// tracing. Callers that want to react to them (count failures, alert, write
// a report) can also subscribe to CrawlEvents through the builder.
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CrawlEvent {
    /// Page fetched and parsed
    Fetched {
        url: String,
        depth: usize,
        items: usize,
        tasks: usize,
    },
    /// Fetch failed; `retrying` says whether the task will be tried again
    FetchFailed {
        url: String,
        depth: usize,
        error: String,
        retrying: bool,
    },
    /// Task was deeper than the max depth and was not crawled
    DepthExceeded { url: String, depth: usize },
    /// URL was already crawled (or queued) during this run
    Duplicate { url: String },
    /// The parse function panicked; the worker carried on
    ParsePanicked { url: String, message: String },
}

/// Totals for one call to `Engine::run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub fetched: u64,
    pub failed: u64,
    pub retried: u64,
    /// Items produced by parse functions
    pub items: u64,
    pub duplicates: u64,
    pub depth_exceeded: u64,
    pub cancelled: bool,
}
