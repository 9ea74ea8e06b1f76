//! Per-source packet rate limiting.
//!
//! Fixed one-window counter keyed by source IP: once `limit` packets have
//! been accepted in the current window, further packets from that address
//! are rejected until the window rolls over. Rejected packets are not
//! counted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::core::{DEFAULT_RATE_LIMIT, RATE_LIMIT_WINDOW};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by client IP.
///
/// The port is ignored, so every peer behind one NAT address shares a
/// single budget.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    ledger: HashMap<IpAddr, Window>,
}

impl RateLimiter {
    /// Create a limiter accepting `limit` packets per `window`.
    ///
    /// A limit of zero disables limiting.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            ledger: HashMap::new(),
        }
    }

    /// Count a packet from `address`; `false` means drop it.
    pub fn check(&mut self, address: IpAddr, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let window = self.window;
        let entry = self.ledger.entry(address).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Forget every address whose window has rolled over.
    pub fn decay(&mut self, now: Instant) {
        let window = self.window;
        self.ledger
            .retain(|_, entry| now.saturating_duration_since(entry.started) < window);
    }

    /// Packets accepted from `address` in its current window.
    pub fn count(&self, address: IpAddr) -> u32 {
        self.ledger.get(&address).map_or(0, |entry| entry.count)
    }

    /// Number of tracked addresses.
    pub fn tracked(&self) -> usize {
        self.ledger.len()
    }

    /// Packets accepted per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT, RATE_LIMIT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_limit_within_window() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();

        let accepted = (0..150)
            .filter(|i| limiter.check(ip(1), now + Duration::from_millis(*i)))
            .count();

        assert_eq!(accepted, 100);
        assert_eq!(150 - accepted, 50);
        assert_eq!(limiter.count(ip(1)), 100);
    }

    #[test]
    fn test_window_rollover_resets() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();
        for _ in 0..120 {
            limiter.check(ip(1), now);
        }
        assert!(!limiter.check(ip(1), now + Duration::from_millis(999)));

        limiter.decay(now + Duration::from_secs(1));
        assert_eq!(limiter.count(ip(1)), 0);
        assert_eq!(limiter.tracked(), 0);
        assert!(limiter.check(ip(1), now + Duration::from_secs(1)));
    }

    #[test]
    fn test_rollover_without_decay() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(1));
        let now = Instant::now();
        assert!(limiter.check(ip(1), now));
        assert!(limiter.check(ip(1), now));
        assert!(!limiter.check(ip(1), now));
        assert!(limiter.check(ip(1), now + Duration::from_secs(1)));
        assert_eq!(limiter.count(ip(1)), 1);
    }

    #[test]
    fn test_addresses_independent() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        let now = Instant::now();
        assert!(limiter.check(ip(1), now));
        assert!(!limiter.check(ip(1), now));
        assert!(limiter.check(ip(2), now));
    }

    #[test]
    fn test_zero_limit_disables() {
        let mut limiter = RateLimiter::new(0, Duration::from_secs(1));
        let now = Instant::now();
        assert!((0..1000).all(|_| limiter.check(ip(1), now)));
        assert_eq!(limiter.tracked(), 0);
    }
}
