// src/proxy.rs
// =============================================================================
// Round-robin proxy rotation.
//
// Every call to get_proxy() returns the next proxy in the list, wrapping
// around at the end. The position is a single atomic counter, so any number
// of workers can rotate at once without a lock.
//
// Supported schemes are whatever reqwest accepts: http, https, socks5.
// An entry without a scheme is treated as http.
// =============================================================================

use crate::error::ProxyError;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

#[derive(Debug)]
pub struct ProxyRotator {
    proxies: Vec<Url>,
    // Lives as long as the rotator; never reset. Overflow wraps, and only
    // the value modulo proxies.len() matters.
    next: AtomicUsize,
}

impl ProxyRotator {
    /// Parses every entry up front so a typo fails at startup, not mid-crawl.
    pub fn new<I, S>(proxy_urls: I) -> Result<Self, ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let proxies = proxy_urls
            .into_iter()
            .map(|raw| parse_proxy_url(raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if proxies.is_empty() {
            return Err(ProxyError::Empty);
        }

        Ok(ProxyRotator {
            proxies,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the next proxy in round-robin order.
    pub fn get_proxy(&self) -> &Url {
        &self.proxies[self.next_index()]
    }

    /// Advances the rotation and returns the chosen position.
    pub(crate) fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len()
    }

    pub fn proxies(&self) -> &[Url] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

fn parse_proxy_url(raw: &str) -> Result<Url, ProxyError> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&with_scheme).map_err(|source| ProxyError::Parse {
        url: raw.to_string(),
        source,
    })?;

    // "http://" parses as a URL with an empty host on some inputs; a proxy
    // without a host is useless.
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::Parse {
            url: raw.to_string(),
            source: url::ParseError::EmptyHost,
        });
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    const PROXIES: [&str; 3] = [
        "http://136.243.254.196",
        "http://185.160.227.134",
        "http://58.220.95.90:9401",
    ];

    #[test]
    fn test_empty_list_fails() {
        let err = ProxyRotator::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ProxyError::Empty));
    }

    #[test]
    fn test_malformed_url_fails() {
        let err = ProxyRotator::new(["http://good.example:8080", "http://[::1"]).unwrap_err();
        assert!(matches!(err, ProxyError::Parse { .. }));

        let err = ProxyRotator::new(["http://"]).unwrap_err();
        assert!(matches!(err, ProxyError::Parse { .. }));
    }

    #[test]
    fn test_missing_scheme_defaults_to_http() {
        let rotator = ProxyRotator::new(["10.0.0.1:3128"]).unwrap();
        assert_eq!(rotator.get_proxy().as_str(), "http://10.0.0.1:3128/");
    }

    #[test]
    fn test_cycles_in_input_order() {
        let rotator = ProxyRotator::new(PROXIES).unwrap();
        let seen: Vec<String> = (0..7)
            .map(|_| rotator.get_proxy().host_str().unwrap().to_string())
            .collect();
        assert_eq!(
            seen,
            vec![
                "136.243.254.196",
                "185.160.227.134",
                "58.220.95.90",
                "136.243.254.196",
                "185.160.227.134",
                "58.220.95.90",
                "136.243.254.196",
            ]
        );
    }

    #[test]
    fn test_concurrent_rotation_is_fair() {
        let rotator = Arc::new(ProxyRotator::new(PROXIES).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || {
                    (0..300)
                        .map(|_| rotator.get_proxy().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for h in handles {
            for url in h.join().unwrap() {
                *counts.entry(url).or_default() += 1;
            }
        }
        // 1200 calls over 3 proxies: exactly 400 each
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&n| n == 400));
    }
}
