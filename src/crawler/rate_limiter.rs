//! Shared rolling-window rate limiter
//!
//! Every outbound request, discovery included, acquires a slot here first.
//! The limiter keeps the start times of the last `calls` reserved slots; a new
//! caller is given the earliest instant that is
//!
//! - not before now,
//! - not before the previously reserved slot (so callers are served in order),
//! - at least `period` after the slot `calls` reservations back.
//!
//! That keeps any `period`-long window at or below `calls` requests no matter
//! how many workers share the limiter. The lock is only held while reserving,
//! never across the sleep.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter shared by every worker of a run
#[derive(Debug)]
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    slots: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `calls` requests per rolling `period`
    pub fn new(calls: u32, period: Duration) -> Self {
        let calls = calls.max(1) as usize;
        Self {
            calls,
            period,
            slots: Mutex::new(VecDeque::with_capacity(calls)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.calls, config.period())
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until the caller may issue one request
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = self.reserve(now);

        if slot > now {
            tracing::trace!(
                wait_ms = (slot - now).as_millis() as u64,
                "Rate limit reached, waiting for a slot"
            );
            tokio::time::sleep_until(slot).await;
        }
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        let mut slot = now;
        if let Some(&last) = slots.back() {
            slot = slot.max(last);
        }
        if slots.len() >= self.calls {
            let anchor = slots[slots.len() - self.calls];
            slot = slot.max(anchor + self.period);
        }

        slots.push_back(slot);
        while slots.len() > self.calls {
            slots.pop_front();
        }

        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_calls_are_immediate() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(Instant::now() - start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_over_budget_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(Instant::now() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_workers_respect_window() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(10)));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..23 {
            let limiter = limiter.clone();
            let starts = starts.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                starts.lock().unwrap().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 23);

        for i in 5..starts.len() {
            assert!(
                starts[i] - starts[i - 5] >= Duration::from_secs(10),
                "more than 5 calls within 10s ending at call {}",
                i
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_stays_bounded() {
        let limiter = RateLimiter::new(3, Duration::from_millis(100));

        for _ in 0..50 {
            limiter.acquire().await;
        }

        assert!(limiter.slots.lock().unwrap().len() <= 3);
    }

    #[test]
    fn test_from_config() {
        let limiter = RateLimiter::from_config(&RateLimitConfig {
            calls: 40,
            period_seconds: 10,
        });
        assert_eq!(limiter.calls(), 40);
        assert_eq!(limiter.period(), Duration::from_secs(10));
    }
}
