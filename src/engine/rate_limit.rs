// src/engine/rate_limit.rs
// =============================================================================
// One shared ticker for the whole engine.
//
// Every fetch waits for the next tick, whichever worker it runs on, so the
// limit applies to the aggregate request rate and not per worker. Missed
// ticks are skipped rather than bunched up, which keeps an idle period from
// turning into a burst.
// =============================================================================

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    // Created on first use so the limiter can be built outside a runtime
    ticker: Mutex<Option<Interval>>,
}

impl RateLimiter {
    /// Returns `None` for a qps of 0, which means "no limit".
    pub fn new(qps: u32) -> Option<Self> {
        if qps == 0 {
            return None;
        }
        Some(RateLimiter {
            period: Duration::from_secs(1) / qps,
            ticker: Mutex::new(None),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until the next request is allowed.
    pub async fn acquire(&self) {
        let mut ticker = self.ticker.lock().await;
        let ticker = ticker.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        ticker.tick().await;
    }
}
