// src/parsers/html.rs
// =============================================================================
// Pulls links and titles out of HTML pages.
//
// We use the `scraper` crate which:
// - Parses HTML into a DOM (Document Object Model)
// - Supports CSS selectors for finding elements
//
// And the `url` crate to resolve relative links against the page URL.
// =============================================================================

use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

// Constant selectors: if these fail to parse it's a programmer error
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

/// A parsed page: its title and every crawlable link on it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageLinks {
    pub title: Option<String>,
    pub links: Vec<String>,
}

// Extracts the title and all absolute http(s) links from a page
//
// Parameters:
//   html: the HTML content to parse
//   base_url: the URL of the page (for resolving relative links)
//
// Example:
//   html = "<a href='/docs'>Docs</a>"
//   base_url = "https://example.com"
//   links = ["https://example.com/docs"]
pub fn extract_page(html: &str, base_url: &str) -> PageLinks {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let base = match Url::parse(base_url) {
        Ok(url) => url,
        Err(_) => return PageLinks { title, links: Vec::new() },
    };

    let mut links = Vec::new();
    for element in document.select(&LINK_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            if let Some(absolute) = resolve_link(&base, href) {
                links.push(absolute);
            }
        }
    }

    PageLinks { title, links }
}

/// Keeps only links whose host matches `domain`.
pub fn same_domain<'a>(links: &'a [String], domain: &'a str) -> impl Iterator<Item = &'a String> {
    links.iter().filter(move |link| {
        Url::parse(link)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(domain)))
            .unwrap_or(false)
    })
}

// Resolves a link (possibly relative) to an absolute http(s) URL
//
// Skips anchors and special protocols (mailto:, tel:, javascript:, data:).
// The fragment is dropped so "page#a" and "page#b" count as the same page.
fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("javascript:")
        || href.starts_with("data:")
    {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
