// src/parsers/mod.rs
// =============================================================================
// Ready-made parse functions.
//
// The engine doesn't know anything about HTML; these are the glue the CLI
// uses. follow_links() turns every page into one item and follows the links
// that stay on the seed's domain.
//
// The crawl scope and the parent page travel in each task's Context:
//   "scope"  - the host links must stay on (empty = follow everything)
//   "parent" - URL of the page the link was found on
// =============================================================================

mod html;

pub use html::{extract_page, same_domain, PageLinks};

use crate::context::Context;
use crate::model::{Item, ParseResult, Response, Task};
use serde_json::json;
use url::Url;

pub const SCOPE_KEY: &str = "scope";
pub const PARENT_KEY: &str = "parent";

/// Builds a seed task for [`follow_links`], scoped to the seed's own host.
pub fn seed(url: &str) -> Task {
    let scope = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let ctx = Context::new();
    ctx.put(SCOPE_KEY, scope);
    Task::with_context(url, follow_links, ctx)
}

/// One item per page, plus a follow-up for every in-scope link.
pub fn follow_links(resp: &Response) -> ParseResult {
    let url = resp.url();
    let scope = resp.request.ctx.get(SCOPE_KEY);
    let parent = resp.request.ctx.get(PARENT_KEY);
    let page = extract_page(&resp.text(), url);

    let mut result = ParseResult::new();
    result.add_item(Item::new(
        url,
        url,
        json!({
            "title": page.title,
            "links": page.links.len(),
            "parent": if parent.is_empty() { None } else { Some(parent) },
        }),
    ));

    let next: Vec<&String> = if scope.is_empty() {
        page.links.iter().collect()
    } else {
        same_domain(&page.links, &scope).collect()
    };

    for link in next {
        result.add_task_with(
            link.as_str(),
            follow_links,
            [(SCOPE_KEY, scope.as_str()), (PARENT_KEY, url)],
        );
    }
    result
}
