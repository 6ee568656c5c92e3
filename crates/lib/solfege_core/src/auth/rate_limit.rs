//! In-process login throttling.
//!
//! Fixed window per key, reset once `window` has elapsed since the window
//! started. Counters live in a sharded map so updates to one key never block
//! or corrupt another. Nothing is persisted; a restart clears every counter.
//!
//! Keys come from client-supplied headers, so finished windows are swept
//! periodically and whenever the map grows past a key ceiling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::HeaderMap;

/// Default attempts allowed per window.
pub const DEFAULT_LIMIT: u32 = 5;

/// Default window: 5 minutes.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Tracked keys above which every check sweeps finished windows first.
pub const DEFAULT_MAX_KEYS: usize = 10_000;

/// Checks between routine sweeps.
const SWEEP_EVERY: u64 = 1024;

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    window_start: Instant,
    count: u32,
}

/// Sliding-window-by-reset counter keyed by client identity.
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    limit: u32,
    window: Duration,
    max_keys: usize,
    checks: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
            max_keys: DEFAULT_MAX_KEYS,
            checks: AtomicU64::new(0),
        }
    }

    /// Override the key ceiling that forces a sweep.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Count one attempt for `key` at `now`.
    ///
    /// The entry is updated under its shard lock, so the read-increment is
    /// atomic per key.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        // Sweep before taking the entry: `retain` locks every shard.
        let n = self.checks.fetch_add(1, Ordering::Relaxed);
        if n % SWEEP_EVERY == SWEEP_EVERY - 1 || self.entries.len() >= self.max_keys {
            self.purge_stale(now);
        }

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(RateLimitEntry {
                window_start: now,
                count: 0,
            });

        if now.saturating_duration_since(entry.window_start) > self.window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);

        RateLimitDecision {
            allowed: entry.count <= self.limit,
            remaining: self.limit.saturating_sub(entry.count),
        }
    }

    /// Drop entries whose window ended before `now`.
    pub fn purge_stale(&self, now: Instant) {
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.window_start) <= self.window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Best-effort client network identity from proxy headers.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("local")
        .to_string()
}

/// Rate-limit key scoped to one logical action, e.g. `login:203.0.113.4`.
pub fn client_key(action: &str, headers: &HeaderMap) -> String {
    format!("{action}:{}", client_ip(headers))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::HeaderValue;

    use super::*;

    #[test]
    fn nth_request_allowed_iff_within_limit() {
        let rl = RateLimiter::new(5, Duration::from_secs(300));
        let t0 = Instant::now();
        for n in 1..=5 {
            let d = rl.check_at("login:1.2.3.4", t0);
            assert!(d.allowed, "request {n} should pass");
            assert_eq!(d.remaining, 5 - n);
        }
        let d = rl.check_at("login:1.2.3.4", t0);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn window_elapse_resets_to_one() {
        let rl = RateLimiter::new(2, Duration::from_secs(300));
        let t0 = Instant::now();
        for _ in 0..10 {
            rl.check_at("k", t0);
        }
        assert!(!rl.check_at("k", t0 + Duration::from_secs(300)).allowed);

        let d = rl.check_at("k", t0 + Duration::from_secs(301));
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(rl.check_at("login:a", t0).allowed);
        assert!(!rl.check_at("login:a", t0).allowed);
        assert!(rl.check_at("login:b", t0).allowed);
    }

    #[test]
    fn concurrent_checks_on_distinct_keys() {
        let rl = Arc::new(RateLimiter::new(1000, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rl = rl.clone();
                std::thread::spawn(move || {
                    let key = format!("k{i}");
                    for _ in 0..100 {
                        rl.check(&key);
                    }
                    rl.check(&key)
                })
            })
            .collect();
        for h in handles {
            let d = h.join().unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, 1000 - 101);
        }
        assert_eq!(rl.len(), 8);
    }

    #[test]
    fn purge_drops_finished_windows() {
        let rl = RateLimiter::new(5, Duration::from_secs(10));
        let t0 = Instant::now();
        rl.check_at("old", t0);
        rl.check_at("new", t0 + Duration::from_secs(15));
        rl.purge_stale(t0 + Duration::from_secs(20));
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn checks_sweep_finished_windows_past_the_key_ceiling() {
        let rl = RateLimiter::new(5, Duration::from_secs(10)).with_max_keys(3);
        let t0 = Instant::now();
        for key in ["login:a", "login:b", "login:c"] {
            rl.check_at(key, t0);
        }
        assert_eq!(rl.len(), 3);

        rl.check_at("login:d", t0 + Duration::from_secs(20));
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn routine_sweep_runs_without_hitting_the_ceiling() {
        let rl = RateLimiter::new(u32::MAX, Duration::from_secs(10));
        let t0 = Instant::now();
        rl.check_at("stale", t0);
        let later = t0 + Duration::from_secs(20);
        for _ in 0..SWEEP_EVERY {
            rl.check_at("busy", later);
        }
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key("login", &headers), "login:local");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers), "10.0.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.4, 10.0.0.1"),
        );
        assert_eq!(client_key("login", &headers), "login:203.0.113.4");
    }
}
