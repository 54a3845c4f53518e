// src/model.rs
// =============================================================================
// The data the engine and parse functions hand back and forth.
//
//   Task = Request (url + depth + per-task Context) + parse function
//   Response = engine Context + decoded body + the Request that produced it
//   ParseResult = items to store + follow-up tasks to crawl
//
// Parse functions receive &Response, so they can't hold on to it after
// returning. They return data; the engine decides what to do with it.
// =============================================================================

use crate::context::{Context, Value};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A parse function: turns one fetched page into items and follow-ups.
pub type ParseFn = Arc<dyn Fn(&Response) -> ParseResult + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Request {
    /// Values handed from the parent's parse function to this task's
    pub ctx: Arc<Context>,
    pub url: String,
    /// Hops from a seed; seeds are depth 1
    pub depth: usize,
    /// How many times this request has been retried
    pub attempt: u32,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Request {
            ctx: Arc::new(Context::new()),
            url: url.into(),
            depth: 1,
            attempt: 0,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    /// The engine-wide Context
    pub ctx: Arc<Context>,
    pub body: Vec<u8>,
    pub request: Request,
}

impl Response {
    /// The body as text, replacing anything that isn't valid UTF-8.
    ///
    /// Bodies are already decoded to UTF-8 by the fetcher, so this is
    /// normally lossless.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }
}

#[derive(Clone)]
pub struct Task {
    pub request: Request,
    pub parse: ParseFn,
}

impl Task {
    /// Creates a seed task (depth 1) with an empty per-task Context.
    pub fn new<F>(url: impl Into<String>, parse: F) -> Self
    where
        F: Fn(&Response) -> ParseResult + Send + Sync + 'static,
    {
        Task {
            request: Request::new(url),
            parse: Arc::new(parse),
        }
    }

    /// Creates a task that carries `ctx` through to its parse function.
    pub fn with_context<F>(url: impl Into<String>, parse: F, ctx: Context) -> Self
    where
        F: Fn(&Response) -> ParseResult + Send + Sync + 'static,
    {
        let mut task = Task::new(url, parse);
        task.request.ctx = Arc::new(ctx);
        task
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn depth(&self) -> usize {
        self.request.depth
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// A parse function that extracts nothing.
pub fn nil_parser(_: &Response) -> ParseResult {
    ParseResult::default()
}

#[derive(Debug, Default, Clone)]
pub struct ParseResult {
    pub tasks: Vec<Task>,
    pub items: Vec<Item>,
}

impl ParseResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a follow-up task. The engine fills in its depth.
    pub fn add_task<F>(&mut self, url: impl Into<String>, parse: F)
    where
        F: Fn(&Response) -> ParseResult + Send + Sync + 'static,
    {
        self.tasks.push(Task::new(url, parse));
    }

    /// Queues a follow-up task whose parse function will see `values` in
    /// `response.request.ctx`.
    pub fn add_task_with<F, I, K, V>(&mut self, url: impl Into<String>, parse: F, values: I)
    where
        F: Fn(&Response) -> ParseResult + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let ctx: Context = values.into_iter().collect();
        self.tasks.push(Task::with_context(url, parse, ctx));
    }

    pub fn add_item(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.items.is_empty()
    }
}

/// An extracted record. The engine never looks inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub data: Value,
}

impl Item {
    pub fn new(id: impl Into<String>, url: impl Into<String>, data: impl Into<Value>) -> Self {
        Item {
            id: id.into(),
            url: url.into(),
            data: data.into(),
        }
    }
}
