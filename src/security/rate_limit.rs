//! Per-remote-address sliding rate limiting (spec §3, §4.C item 1).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

const WINDOW: Duration = Duration::seconds(60);

struct Window {
    start: DateTime<Utc>,
    count: u32,
}

/// Fixed-window counter per remote address, reset on expiry. The spec
/// mandates counting from the first request observed in the window
/// (see DESIGN.md open-question #2) rather than a sliding log.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    limit: u32,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            limit,
        }
    }

    /// Record one request from `remote` at `now`; returns `true` if
    /// this request exceeds the configured per-minute limit.
    pub fn check(&self, remote: &str, now: DateTime<Utc>) -> bool {
        let mut entry = self.windows.entry(remote.to_string()).or_insert_with(|| Window {
            start: now,
            count: 0,
        });

        if now - entry.start > WINDOW {
            entry.start = now;
            entry.count = 0;
        }

        entry.count += 1;
        entry.count > self.limit
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        self.windows.retain(|_, w| now - w.start <= WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_is_allowed() {
        let limiter = RateLimiter::new(3);
        let now = Utc::now();
        assert!(!limiter.check("10.0.0.1", now));
        assert!(!limiter.check("10.0.0.1", now));
        assert!(!limiter.check("10.0.0.1", now));
    }

    #[test]
    fn exceeding_limit_blocks() {
        let limiter = RateLimiter::new(3);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(!limiter.check("10.0.0.1", now));
        }
        assert!(limiter.check("10.0.0.1", now));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(1);
        let now = Utc::now();
        assert!(!limiter.check("10.0.0.1", now));
        assert!(limiter.check("10.0.0.1", now));

        let later = now + Duration::seconds(61);
        assert!(!limiter.check("10.0.0.1", later));
    }

    #[test]
    fn separate_remotes_do_not_share_counters() {
        let limiter = RateLimiter::new(1);
        let now = Utc::now();
        assert!(!limiter.check("10.0.0.1", now));
        assert!(!limiter.check("10.0.0.2", now));
    }

    #[test]
    fn hundred_and_one_requests_trips_default_limit() {
        let limiter = RateLimiter::new(100);
        let now = Utc::now();
        let mut last_blocked = false;
        for _ in 0..101 {
            last_blocked = limiter.check("10.0.0.5", now);
        }
        assert!(last_blocked);
    }
}
