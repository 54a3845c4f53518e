// src/lib.rs
// =============================================================================
// depthcrawl: a depth-bounded web crawling engine.
//
// You give it seed URLs and parse functions. It fetches each page, hands the
// decoded body to the task's parse function, sends the extracted items to
// your pipeline, and crawls the follow-up URLs the parse function returns,
// up to a maximum depth, never fetching the same URL twice.
//
// Layout:
// - context:   thread-safe key/value store passed to parse functions
// - proxy:     lock-free round-robin proxy rotation
// - model:     Task / Request / Response / ParseResult / Item
// - scheduler: matches tasks with idle workers (rendezvous or simple)
// - engine:    the worker pool and fetch-parse-dispatch loop
// - parsers:   a ready-made "follow same-domain links" parse function
//
// Example:
//
//   let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//   let engine = Engine::builder().workers(3).qps(2).max_depth(3).pipeline(tx).build()?;
//   tokio::spawn(async move { while let Some(item) = rx.recv().await { /* store */ } });
//   engine.run([parsers::seed("https://example.com")]).await?;
// =============================================================================

pub mod context;
pub mod engine;
pub mod error;
pub mod model;
pub mod parsers;
pub mod proxy;
pub mod scheduler;

pub use context::{Context, Value};
pub use engine::{
    CrawlEvent, CrawlSummary, Engine, EngineBuilder, EngineConfig, Fetcher, HttpFetcher,
    RetryPolicy,
};
pub use error::{CrawlError, FetchError, ProxyError};
pub use model::{nil_parser, Item, ParseFn, ParseResult, Request, Response, Task};
pub use proxy::ProxyRotator;
pub use scheduler::{Scheduler, SchedulerKind, WorkerSlot};
