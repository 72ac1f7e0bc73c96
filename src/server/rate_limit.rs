//! Per-client-IP fixed-window rate limiting (§4.I).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tracked-IP count above which the store is proactively pruned of expired
/// windows, bounding memory under a sustained flood of distinct clients.
const PRUNE_THRESHOLD: usize = 10_000;

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    limit: u32,
    period: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            period,
        }
    }

    /// Returns `true` if the request is admitted under the current window.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();

        if windows.len() > PRUNE_THRESHOLD {
            let period = self.period;
            windows.retain(|_, w| now.duration_since(w.started_at) < period);
        }

        let admitted = match windows.get_mut(&ip) {
            Some(window) if now.duration_since(window.started_at) < self.period => {
                window.count += 1;
                window.count <= self.limit
            }
            _ => {
                windows.insert(ip, Window { started_at: now, count: 1 });
                true
            }
        };
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_requests_under_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn tracks_distinct_ips_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(limiter.check(b));
        assert!(!limiter.check(a));
    }
}
