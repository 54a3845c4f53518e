// src/engine/retry.rs
// =============================================================================
// Retry policy for failed fetches.
//
// Off by default: a failed task is reported and dropped. When enabled, only
// fetch errors are retried (never depth or parse failures), with exponential
// backoff capped at max_delay.
// =============================================================================

use crate::error::CrawlError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries on top of the first attempt; 0 disables retrying
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Also retry HTTP 429 and 5xx responses, not just network errors
    pub retry_status: bool,
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            retry_status: true,
        }
    }

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            ..Self::none()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_retry_status(mut self, retry_status: bool) -> Self {
        self.retry_status = retry_status;
        self
    }

    /// `attempt` is how many retries the task has already had.
    pub fn should_retry(&self, err: &CrawlError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        match err {
            CrawlError::Fetch(e) => e.is_retryable(self.retry_status),
            _ => false,
        }
    }

    /// base_delay * 2^attempt, capped at max_delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use reqwest::StatusCode;

    fn unavailable() -> CrawlError {
        FetchError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
        .into()
    }

    #[test]
    fn test_default_never_retries() {
        assert!(!RetryPolicy::default().should_retry(&unavailable(), 0));
    }

    #[test]
    fn test_retries_up_to_limit() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        assert!(policy.should_retry(&unavailable(), 0));
        assert!(policy.should_retry(&unavailable(), 1));
        assert!(!policy.should_retry(&unavailable(), 2));
    }

    #[test]
    fn test_status_retry_can_be_disabled() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).with_retry_status(false);
        assert!(!policy.should_retry(&unavailable(), 0));
    }

    #[test]
    fn test_depth_and_panics_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert!(!policy.should_retry(&CrawlError::MaxDepth { depth: 4, max: 3 }, 0));
        let panic = CrawlError::ParsePanic {
            url: "https://example.com".into(),
            message: "boom".into(),
        };
        assert!(!policy.should_retry(&panic, 0));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }
}
