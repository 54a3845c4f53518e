// src/engine/mod.rs
// =============================================================================
// The crawl engine: fetch, parse, dispatch, repeat.
//
// How a run works:
// 1. Start the scheduler
// 2. Spawn N workers; each one announces it is idle, waits for a task,
//    calls process(), and reports the outcome
// 3. Submit the seed tasks
// 4. Loop over outcomes:
//    - items go to the pipeline (through one bounded forwarding queue whose
//      forwarder outlives run(), so the caller may read items afterwards)
//    - follow-up tasks are checked against the max depth and the visited
//      set, then submitted
//    - failures are logged, reported as events, and maybe retried
// 5. Stop when nothing is queued or in flight (or when cancelled)
//
// The visited set and the outstanding-task count belong to the results loop
// alone, so neither needs a lock.
// =============================================================================

mod builder;
mod charset;
mod events;
mod fetch;
mod rate_limit;
mod retry;

pub use builder::{EngineBuilder, EngineConfig};
pub use charset::{decode_body, detect_encoding};
pub use events::{CrawlEvent, CrawlSummary};
pub use fetch::{random_user_agent, Fetcher, HttpFetcher};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

use crate::context::Context;
use crate::error::{CrawlError, FetchError};
use crate::model::{Item, ParseResult, Response, Task};
use crate::scheduler::Scheduler;
use futures::future::join_all;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone)]
pub struct Engine {
    ctx: Arc<Context>,
    scheduler: Scheduler,
    workers: usize,
    fetcher: Arc<dyn Fetcher>,
    rate_limiter: Option<Arc<RateLimiter>>,
    pipeline: Option<mpsc::Sender<Item>>,
    pipeline_buffer: usize,
    events: Option<mpsc::UnboundedSender<CrawlEvent>>,
    retry: RetryPolicy,
    stop_when_idle: bool,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
}

// What a worker sends back after handling one task
struct Outcome {
    task: Task,
    result: Result<ParseResult, CrawlError>,
}

// State owned by the results loop
#[derive(Default)]
struct RunState {
    visited: HashSet<String>,
    // Submitted tasks that haven't reported back yet
    outstanding: usize,
    summary: CrawlSummary,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The engine-wide Context every Response carries.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Cancelling this token stops a running crawl.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Crawls from `seeds` until there is nothing left to do, or until the
    /// engine is cancelled when built with `stop_when_idle(false)`.
    pub async fn run<I>(&self, seeds: I) -> Result<CrawlSummary, CrawlError>
    where
        I: IntoIterator<Item = Task>,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CrawlError::AlreadyRunning);
        }

        info!(
            workers = self.workers,
            scheduler = ?self.scheduler.kind(),
            max_depth = self.ctx.max_depth(),
            "crawl starting"
        );

        // Local token: finishing naturally must not cancel the caller's
        let shutdown = self.cancel.child_token();
        self.scheduler.run(shutdown.clone());

        let (out_tx, mut out_rx) = mpsc::channel(self.workers * 2);
        let workers: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|id| tokio::spawn(self.clone().work(id, out_tx.clone(), shutdown.clone())))
            .collect();
        drop(out_tx);

        let item_tx = self.spawn_forwarder();

        let mut state = RunState::default();
        for task in seeds {
            self.enqueue(&mut state, task);
        }

        while !(self.stop_when_idle && state.outstanding == 0) {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = out_rx.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => break,
                },
            };
            self.handle_outcome(&mut state, outcome, &item_tx, &shutdown)
                .await;
        }

        // The loop can also end on an idle count after handle_outcome bailed
        // out of a send because of a cancel, so ask the token itself.
        state.summary.cancelled = shutdown.is_cancelled();

        // Stop the dispatcher and any worker still mid-fetch
        shutdown.cancel();
        for worker in &workers {
            worker.abort();
        }
        join_all(workers).await;

        // Items still queued keep flowing to the pipeline from the detached
        // forwarder; run() never waits on the consumer.
        drop(item_tx);

        info!(
            fetched = state.summary.fetched,
            failed = state.summary.failed,
            items = state.summary.items,
            duplicates = state.summary.duplicates,
            depth_exceeded = state.summary.depth_exceeded,
            cancelled = state.summary.cancelled,
            "crawl finished"
        );
        Ok(state.summary)
    }

    /// Fetches and parses one task.
    ///
    /// Tasks deeper than the max depth fail with [`CrawlError::MaxDepth`]
    /// without being fetched. Follow-up tasks in the result come back one
    /// level deeper than `task`.
    pub async fn process(&self, task: &Task) -> Result<ParseResult, CrawlError> {
        let depth = task.depth();
        let max = self.ctx.max_depth();
        if max > 0 && depth > max {
            return Err(CrawlError::MaxDepth { depth, max });
        }

        let body = self.fetch(task.url()).await?;
        let response = Response {
            ctx: Arc::clone(&self.ctx),
            body,
            request: task.request.clone(),
        };

        let parse = Arc::clone(&task.parse);
        let mut result = panic::catch_unwind(AssertUnwindSafe(|| parse(&response))).map_err(
            |payload| CrawlError::ParsePanic {
                url: task.url().to_string(),
                message: panic_message(payload.as_ref()),
            },
        )?;

        for child in &mut result.tasks {
            child.request.depth = depth + 1;
        }
        Ok(result)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        self.fetcher.fetch(url).await
    }

    async fn work(self, id: usize, out: mpsc::Sender<Outcome>, shutdown: CancellationToken) {
        let mut slot = self.scheduler.worker();
        loop {
            self.scheduler.worker_ready(&slot);
            let task = tokio::select! {
                _ = shutdown.cancelled() => break,
                task = slot.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            trace!(worker = id, url = %task.url(), depth = task.depth(), "processing");
            let result = self.process(&task).await;
            if out.send(Outcome { task, result }).await.is_err() {
                break;
            }
        }
        debug!(worker = id, "worker stopped");
    }

    // Depth and dedup checks, then hand the task to the scheduler.
    fn enqueue(&self, state: &mut RunState, task: Task) {
        let max = self.ctx.max_depth();
        if max > 0 && task.depth() > max {
            trace!(url = %task.url(), depth = task.depth(), "beyond max depth, not queued");
            state.summary.depth_exceeded += 1;
            self.emit(CrawlEvent::DepthExceeded {
                url: task.url().to_string(),
                depth: task.depth(),
            });
            return;
        }

        if !state.visited.insert(task.url().to_string()) {
            trace!(url = %task.url(), "already seen");
            state.summary.duplicates += 1;
            self.emit(CrawlEvent::Duplicate {
                url: task.url().to_string(),
            });
            return;
        }

        state.outstanding += 1;
        self.scheduler.submit(task);
    }

    async fn handle_outcome(
        &self,
        state: &mut RunState,
        outcome: Outcome,
        item_tx: &mpsc::Sender<Item>,
        shutdown: &CancellationToken,
    ) {
        let Outcome { task, result } = outcome;

        let result = match result {
            Ok(result) => result,
            Err(err) if self.retry.should_retry(&err, task.request.attempt) => {
                self.schedule_retry(state, task, err, shutdown);
                return;
            }
            Err(err) => {
                state.outstanding -= 1;
                self.report_failure(state, &task, err);
                return;
            }
        };

        state.outstanding -= 1;
        state.summary.fetched += 1;
        debug!(
            url = %task.url(),
            depth = task.depth(),
            items = result.items.len(),
            tasks = result.tasks.len(),
            "fetched"
        );
        self.emit(CrawlEvent::Fetched {
            url: task.url().to_string(),
            depth: task.depth(),
            items: result.items.len(),
            tasks: result.tasks.len(),
        });

        for item in result.items {
            state.summary.items += 1;
            // Waits for room in the forwarding queue; that wait is what
            // slows the crawl down when the pipeline can't keep up.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                sent = item_tx.send(item) => {
                    if sent.is_err() {
                        warn!("item forwarder stopped; item dropped");
                    }
                }
            }
        }

        for child in result.tasks {
            self.enqueue(state, child);
        }
    }

    // The task stays outstanding while it waits to be resubmitted.
    fn schedule_retry(
        &self,
        state: &mut RunState,
        mut task: Task,
        err: CrawlError,
        shutdown: &CancellationToken,
    ) {
        let delay = self.retry.delay_for(task.request.attempt);
        state.summary.retried += 1;
        warn!(
            url = %task.url(),
            attempt = task.request.attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "fetch failed, retrying"
        );
        self.emit(CrawlEvent::FetchFailed {
            url: task.url().to_string(),
            depth: task.depth(),
            error: err.to_string(),
            retrying: true,
        });

        task.request.attempt += 1;
        let scheduler = self.scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => scheduler.submit(task),
            }
        });
    }

    fn report_failure(&self, state: &mut RunState, task: &Task, err: CrawlError) {
        let url = task.url().to_string();
        let depth = task.depth();
        match err {
            CrawlError::MaxDepth { .. } => {
                trace!(%url, depth, "beyond max depth");
                state.summary.depth_exceeded += 1;
                self.emit(CrawlEvent::DepthExceeded { url, depth });
            }
            CrawlError::ParsePanic { message, .. } => {
                error!(%url, %message, "parse function panicked");
                state.summary.failed += 1;
                self.emit(CrawlEvent::ParsePanicked { url, message });
            }
            err => {
                warn!(%url, depth, error = %err, "fetch failed");
                state.summary.failed += 1;
                self.emit(CrawlEvent::FetchFailed {
                    url,
                    depth,
                    error: err.to_string(),
                    retrying: false,
                });
            }
        }
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(events) = &self.events {
            // Nobody listening any more is fine
            let _ = events.send(event);
        }
    }

    // A single detached task moves items from a bounded queue into the
    // pipeline. It ends once the queue is closed and empty, or as soon as the
    // engine is cancelled (dropping whatever is still queued).
    fn spawn_forwarder(&self) -> mpsc::Sender<Item> {
        let (tx, mut rx) = mpsc::channel::<Item>(self.pipeline_buffer);
        let mut pipeline = self.pipeline.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let Some(sink) = &pipeline else {
                    trace!(id = %item.id, "no pipeline configured, item discarded");
                    continue;
                };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = sink.send(item) => sent,
                };
                if sent.is_err() {
                    warn!("item pipeline closed; discarding further items");
                    pipeline = None;
                }
            }
            debug!("item forwarder stopped");
        });

        tx
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler.kind())
            .field("workers", &self.workers)
            .field("max_depth", &self.ctx.max_depth())
            .field("rate_limiter", &self.rate_limiter)
            .field("retry", &self.retry)
            .field("stop_when_idle", &self.stop_when_idle)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// -----------------------------------------------------------------------------
// NOTES:
//
// 1. Why does every task report back, even failures?
//    - The results loop counts outstanding tasks to know when the crawl is
//      done; a silently dropped task would keep it waiting forever
//
// 2. Why catch_unwind around the parse call?
//    - A panicking parse function would otherwise kill its worker, and the
//      task would never report back (see 1)
//
// 3. Why filter depth before submitting AND inside process()?
//    - The loop filter keeps too-deep tasks from using a worker at all
//    - process() is public, so it enforces the limit on its own too
// -----------------------------------------------------------------------------
