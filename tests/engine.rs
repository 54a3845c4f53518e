// tests/engine.rs
// =============================================================================
// End-to-end engine tests against an in-memory site.
//
// StubFetcher serves pages from a HashMap and counts hits per URL, so the
// tests can check exactly what was fetched without touching the network.
// A page body is just the list of URLs it links to, one per line.
// =============================================================================

use async_trait::async_trait;
use depthcrawl::{
    CrawlError, CrawlEvent, Engine, FetchError, Fetcher, Item, ParseResult, Response,
    RetryPolicy, SchedulerKind, Task, Value,
};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

enum Page {
    Ok(&'static str),
    Status(StatusCode),
    // Fails with the status this many times, then serves the body
    Flaky(usize, StatusCode, &'static str),
}

#[derive(Default)]
struct StubFetcher {
    pages: HashMap<String, Page>,
    hits: Mutex<HashMap<String, usize>>,
}

impl StubFetcher {
    fn new(pages: Vec<(&str, Page)>) -> Arc<Self> {
        Arc::new(StubFetcher {
            pages: pages.into_iter().map(|(u, p)| (u.to_string(), p)).collect(),
            hits: Mutex::default(),
        })
    }

    fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let hit = {
            let mut hits = self.hits.lock().unwrap();
            let n = hits.entry(url.to_string()).or_default();
            *n += 1;
            *n
        };
        match self.pages.get(url) {
            Some(Page::Ok(body)) => Ok(body.as_bytes().to_vec()),
            Some(Page::Status(status)) => Err(FetchError::Status { status: *status }),
            Some(Page::Flaky(failures, status, body)) => {
                if hit <= *failures {
                    Err(FetchError::Status { status: *status })
                } else {
                    Ok(body.as_bytes().to_vec())
                }
            }
            None => Err(FetchError::Status {
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}

// One item per page, one follow-up per line of the body
fn link_lines(resp: &Response) -> ParseResult {
    let mut result = ParseResult::new();
    result.add_item(Item::new(resp.url(), resp.url(), resp.request.depth as i64));
    for line in resp.text().lines().map(str::trim).filter(|l| !l.is_empty()) {
        result.add_task(line, link_lines);
    }
    result
}

// Drops the engine (closing its side of the pipeline) and reads every item
// the forwarder still hands over.
async fn collect_items(engine: Engine, mut rx: mpsc::Receiver<Item>) -> Vec<Item> {
    drop(engine);
    let mut out = Vec::new();
    while let Some(item) = with_timeout(rx.recv()).await {
        out.push(item);
    }
    out
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<CrawlEvent>) -> Vec<CrawlEvent> {
    let mut out = Vec::new();
    while let Ok(v) = rx.try_recv() {
        out.push(v);
    }
    out
}

async fn with_timeout<F: std::future::Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("crawl did not finish")
}

#[tokio::test]
async fn test_process_rejects_task_beyond_max_depth() {
    let fetcher = StubFetcher::new(vec![("a", Page::Ok(""))]);
    let engine = Engine::builder()
        .max_depth(2)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let mut task = Task::new("a", link_lines);
    task.request.depth = 3;
    let err = engine.process(&task).await.unwrap_err();
    assert!(matches!(err, CrawlError::MaxDepth { depth: 3, max: 2 }));
    assert_eq!(fetcher.hits("a"), 0);

    task.request.depth = 2;
    assert!(engine.process(&task).await.is_ok());
    assert_eq!(fetcher.hits("a"), 1);
}

#[tokio::test]
async fn test_follow_ups_are_one_level_deeper() {
    let fetcher = StubFetcher::new(vec![("a", Page::Ok("b\nc"))]);
    let engine = Engine::builder().fetcher(fetcher).build().unwrap();

    let mut task = Task::new("a", link_lines);
    task.request.depth = 4;
    let result = engine.process(&task).await.unwrap();

    assert_eq!(result.tasks.len(), 2);
    assert!(result.tasks.iter().all(|t| t.depth() == 5));
}

#[tokio::test]
async fn test_seed_rediscovered_is_fetched_once() {
    let fetcher = StubFetcher::new(vec![("a", Page::Ok("a\nb")), ("b", Page::Ok("a"))]);
    let engine = Engine::builder()
        .workers(2)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let summary = with_timeout(engine.run([Task::new("a", link_lines)]))
        .await
        .unwrap();

    assert_eq!(fetcher.hits("a"), 1);
    assert_eq!(fetcher.hits("b"), 1);
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.duplicates, 2);
}

#[tokio::test]
async fn test_duplicate_seeds_are_dropped() {
    let fetcher = StubFetcher::new(vec![("a", Page::Ok(""))]);
    let engine = Engine::builder().fetcher(fetcher.clone()).build().unwrap();

    let summary = with_timeout(engine.run([
        Task::new("a", link_lines),
        Task::new("a", link_lines),
    ]))
    .await
    .unwrap();

    assert_eq!(fetcher.hits("a"), 1);
    assert_eq!(summary.duplicates, 1);
}

#[tokio::test]
async fn test_max_depth_one_never_dispatches_follow_up() {
    let fetcher = StubFetcher::new(vec![("seed", Page::Ok("child")), ("child", Page::Ok(""))]);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = Engine::builder()
        .max_depth(1)
        .fetcher(fetcher.clone())
        .events(event_tx)
        .build()
        .unwrap();

    // A parse function that returns no items and one follow-up
    let parse = |_: &Response| {
        let mut result = ParseResult::new();
        result.add_task("child", depthcrawl::nil_parser);
        result
    };
    let summary = with_timeout(engine.run([Task::new("seed", parse)]))
        .await
        .unwrap();

    assert_eq!(fetcher.hits("child"), 0);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.depth_exceeded, 1);
    assert!(drain_events(&mut event_rx).contains(&CrawlEvent::DepthExceeded {
        url: "child".into(),
        depth: 2,
    }));
}

#[tokio::test]
async fn test_depth_limit_over_a_chain() {
    let fetcher = StubFetcher::new(vec![
        ("d1", Page::Ok("d2")),
        ("d2", Page::Ok("d3")),
        ("d3", Page::Ok("d4")),
        ("d4", Page::Ok("")),
    ]);
    let (item_tx, item_rx) = mpsc::channel(16);
    let engine = Engine::builder()
        .max_depth(3)
        .workers(2)
        .fetcher(fetcher.clone())
        .pipeline(item_tx)
        .build()
        .unwrap();

    let summary = with_timeout(engine.run([Task::new("d1", link_lines)]))
        .await
        .unwrap();

    assert_eq!(fetcher.hits("d4"), 0);
    assert_eq!(summary.fetched, 3);

    // Each item records the depth its page was fetched at
    let mut depths: Vec<_> = collect_items(engine, item_rx)
        .await
        .into_iter()
        .map(|item| (item.url, item.data))
        .collect();
    depths.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        depths,
        vec![
            ("d1".to_string(), Value::Int(1)),
            ("d2".to_string(), Value::Int(2)),
            ("d3".to_string(), Value::Int(3)),
        ]
    );
}

#[tokio::test]
async fn test_non_200_produces_no_items_or_tasks() {
    let fetcher = StubFetcher::new(vec![(
        "broken",
        Page::Status(StatusCode::INTERNAL_SERVER_ERROR),
    )]);
    let (item_tx, item_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = Engine::builder()
        .fetcher(fetcher.clone())
        .pipeline(item_tx)
        .events(event_tx)
        .build()
        .unwrap();

    // Would add an item and a follow-up if it were ever called
    let parse = |resp: &Response| {
        let mut result = ParseResult::new();
        result.add_item(Item::new("x", resp.url(), "x"));
        result.add_task("next", depthcrawl::nil_parser);
        result
    };
    let summary = with_timeout(engine.run([Task::new("broken", parse)]))
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.items, 0);
    assert_eq!(fetcher.total_hits(), 1);
    assert!(collect_items(engine, item_rx).await.is_empty());

    let events = drain_events(&mut event_rx);
    assert!(matches!(
        events.as_slice(),
        [CrawlEvent::FetchFailed { retrying: false, .. }]
    ));
}

#[tokio::test]
async fn test_items_reach_pipeline() {
    let fetcher = StubFetcher::new(vec![
        ("home", Page::Ok("about\nblog")),
        ("about", Page::Ok("home")),
        ("blog", Page::Ok("home\nabout")),
    ]);
    let (item_tx, item_rx) = mpsc::channel(16);
    let engine = Engine::builder()
        .workers(3)
        .fetcher(fetcher)
        .pipeline(item_tx)
        .build()
        .unwrap();

    let summary = with_timeout(engine.run([Task::new("home", link_lines)]))
        .await
        .unwrap();

    let mut ids: Vec<_> = collect_items(engine, item_rx)
        .await
        .into_iter()
        .map(|i| i.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["about", "blog", "home"]);
    assert_eq!(summary.items, 3);
}

#[tokio::test]
async fn test_small_pipeline_buffer_still_delivers_everything() {
    let pages: Vec<(&str, Page)> = vec![
        ("p0", Page::Ok("p1\np2\np3\np4")),
        ("p1", Page::Ok("")),
        ("p2", Page::Ok("")),
        ("p3", Page::Ok("")),
        ("p4", Page::Ok("")),
    ];
    let (item_tx, mut item_rx) = mpsc::channel(1);
    let engine = Engine::builder()
        .workers(2)
        .fetcher(StubFetcher::new(pages))
        .pipeline(item_tx)
        .pipeline_buffer(1)
        .build()
        .unwrap();

    // A slow consumer running alongside the crawl
    let consumer = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(_item) = item_rx.recv().await {
            seen += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if seen == 5 {
                break;
            }
        }
        seen
    });

    let summary = with_timeout(engine.run([Task::new("p0", link_lines)]))
        .await
        .unwrap();
    assert_eq!(summary.items, 5);
    assert_eq!(consumer.await.unwrap(), 5);
}

// Emits `n` items from one page and follows nothing
fn many_items(n: usize) -> impl Fn(&Response) -> ParseResult + Send + Sync + 'static {
    move |resp: &Response| {
        let mut result = ParseResult::new();
        for i in 0..n {
            result.add_item(Item::new(format!("item-{}", i), resp.url(), i as i64));
        }
        result
    }
}

#[tokio::test]
async fn test_run_returns_before_pipeline_is_read() {
    let (item_tx, item_rx) = mpsc::channel(2);
    let engine = Engine::builder()
        .fetcher(StubFetcher::new(vec![("page", Page::Ok(""))]))
        .pipeline(item_tx)
        .build()
        .unwrap();

    // Nobody reads until the crawl is over
    let summary = with_timeout(engine.run([Task::new("page", many_items(5))]))
        .await
        .unwrap();
    assert_eq!(summary.items, 5);
    assert!(!summary.cancelled);

    let ids: Vec<_> = collect_items(engine, item_rx)
        .await
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["item-0", "item-1", "item-2", "item-3", "item-4"]);
}

#[tokio::test]
async fn test_cancel_unblocks_run_with_stalled_pipeline() {
    // A pipeline that is never read, with room for one item in each queue
    let (item_tx, _item_rx) = mpsc::channel(1);
    let engine = Engine::builder()
        .fetcher(StubFetcher::new(vec![("page", Page::Ok(""))]))
        .pipeline(item_tx)
        .pipeline_buffer(1)
        .build()
        .unwrap();
    let cancel = engine.cancel_token();

    let running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run([Task::new("page", many_items(10))]).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.is_finished());
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("run still blocked after cancel")
        .unwrap()
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.fetched, 1);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failures() {
    let fetcher = StubFetcher::new(vec![(
        "flaky",
        Page::Flaky(2, StatusCode::SERVICE_UNAVAILABLE, ""),
    )]);
    let engine = Engine::builder()
        .fetcher(fetcher.clone())
        .retry(RetryPolicy::new(2, Duration::from_millis(1)))
        .build()
        .unwrap();

    let summary = with_timeout(engine.run([Task::new("flaky", link_lines)]))
        .await
        .unwrap();

    assert_eq!(fetcher.hits("flaky"), 3);
    assert_eq!(summary.retried, 2);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_retry_gives_up_after_limit() {
    let fetcher = StubFetcher::new(vec![(
        "down",
        Page::Status(StatusCode::BAD_GATEWAY),
    )]);
    let engine = Engine::builder()
        .fetcher(fetcher.clone())
        .retry(RetryPolicy::new(1, Duration::from_millis(1)))
        .build()
        .unwrap();

    let summary = with_timeout(engine.run([Task::new("down", link_lines)]))
        .await
        .unwrap();

    assert_eq!(fetcher.hits("down"), 2);
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_parse_panic_is_reported_and_worker_survives() {
    let fetcher = StubFetcher::new(vec![("bad", Page::Ok("")), ("good", Page::Ok(""))]);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = Engine::builder()
        .workers(1)
        .fetcher(fetcher.clone())
        .events(event_tx)
        .build()
        .unwrap();

    let explode = |_: &Response| -> ParseResult { panic!("unexpected markup") };
    let summary = with_timeout(engine.run([
        Task::new("bad", explode),
        Task::new("good", link_lines),
    ]))
    .await
    .unwrap();

    // The single worker went on to fetch "good" after the panic
    assert_eq!(fetcher.hits("good"), 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.fetched, 1);
    assert!(drain_events(&mut event_rx).contains(&CrawlEvent::ParsePanicked {
        url: "bad".into(),
        message: "unexpected markup".into(),
    }));
}

#[tokio::test]
async fn test_cancel_stops_a_run_forever_engine() {
    let fetcher = StubFetcher::new(vec![("a", Page::Ok(""))]);
    let engine = Engine::builder()
        .fetcher(fetcher.clone())
        .stop_when_idle(false)
        .build()
        .unwrap();
    let cancel = engine.cancel_token();

    let running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run([Task::new("a", link_lines)]).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!running.is_finished());
    cancel.cancel();

    let summary = with_timeout(running).await.unwrap().unwrap();
    assert!(summary.cancelled);
    assert_eq!(fetcher.hits("a"), 1);
}

#[tokio::test]
async fn test_run_twice_fails() {
    let engine = Engine::builder()
        .fetcher(StubFetcher::new(vec![]))
        .build()
        .unwrap();
    let summary = with_timeout(engine.run(Vec::new())).await.unwrap();
    assert_eq!(summary, depthcrawl::CrawlSummary::default());

    let err = engine.run(Vec::new()).await.unwrap_err();
    assert!(matches!(err, CrawlError::AlreadyRunning));
}

#[tokio::test]
async fn test_simple_scheduler_crawls_everything_once() {
    let fetcher = StubFetcher::new(vec![
        ("r", Page::Ok("x\ny\nz")),
        ("x", Page::Ok("y\nz\nr")),
        ("y", Page::Ok("x\nz")),
        ("z", Page::Ok("r")),
    ]);
    let engine = Engine::builder()
        .workers(3)
        .scheduler(SchedulerKind::Simple)
        .fetcher(fetcher.clone())
        .build()
        .unwrap();

    let summary = with_timeout(engine.run([Task::new("r", link_lines)]))
        .await
        .unwrap();

    for url in ["r", "x", "y", "z"] {
        assert_eq!(fetcher.hits(url), 1, "{} fetched more than once", url);
    }
    assert_eq!(summary.fetched, 4);
}

#[tokio::test]
async fn test_context_values_flow_to_child_parse() {
    fn province(_: &Response) -> ParseResult {
        let mut result = ParseResult::new();
        result.add_task_with("city-11", city, [("parentId", 11)]);
        result
    }

    fn city(resp: &Response) -> ParseResult {
        let parent = resp.request.ctx.get_any("parentId").and_then(|v| v.as_int());
        let region = resp.ctx.get("region");
        let mut result = ParseResult::new();
        result.add_item(Item::new(
            "1101",
            resp.url(),
            serde_json::json!({ "parentId": parent, "region": region }),
        ));
        result
    }

    let fetcher = StubFetcher::new(vec![("province", Page::Ok("")), ("city-11", Page::Ok(""))]);
    let (item_tx, item_rx) = mpsc::channel(4);
    let engine = Engine::builder()
        .fetcher(fetcher)
        .pipeline(item_tx)
        .build()
        .unwrap();
    engine.context().put("region", "north");

    with_timeout(engine.run([Task::new("province", province)]))
        .await
        .unwrap();

    let items = collect_items(engine, item_rx).await;
    assert_eq!(items.len(), 1);
    let data = items[0].data.as_record().unwrap();
    assert_eq!(data["parentId"], 11);
    assert_eq!(data["region"], "north");
}
