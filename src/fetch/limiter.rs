// src/fetch/limiter.rs
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Process-wide gate spacing outbound calls at least `interval` apart,
/// across all callers. Grants are handed out in the order `acquire` takes
/// the lock; the lock is never held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until this caller's slot comes up. Never fails.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        trace!(wait_ms = slot.saturating_duration_since(Instant::now()).as_millis() as u64, "rate limit");
        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    #[tokio::test(start_paused = true)]
    async fn first_grant_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_grants_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_gate() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
        let start = Instant::now();
        let mut set = JoinSet::new();
        for _ in 0..10 {
            let l = Arc::clone(&limiter);
            set.spawn(async move {
                l.acquire().await;
                Instant::now()
            });
        }
        let mut grants = Vec::new();
        while let Some(res) = set.join_next().await {
            grants.push(res.unwrap());
        }
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert_eq!(*grants.last().unwrap() - start, Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_is_not_banked() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
