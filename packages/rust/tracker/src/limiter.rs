//! Shared rate limiter for tracker API calls.
//!
//! One limiter is shared by every batch worker. `acquire` is an atomic
//! check-or-wait: a worker blocks until its slot arrives rather than
//! erroring immediately on an exhausted quota, but only up to a bounded
//! wait, after which the call fails as a transient error (eligible for
//! retry).

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::trace;

use vigil_shared::{Result, VigilError};

/// Evenly spaces calls at one per `min_interval`, shared across workers.
pub struct RateLimiter {
    /// Earliest instant the next call may start.
    next_slot: Mutex<Instant>,
    min_interval: Duration,
    max_wait: Duration,
}

impl RateLimiter {
    /// A limiter allowing one call per `min_interval`, with callers waiting
    /// at most `max_wait` for their slot.
    pub fn new(min_interval: Duration, max_wait: Duration) -> Self {
        Self {
            next_slot: Mutex::new(Instant::now()),
            min_interval,
            max_wait,
        }
    }

    /// Effectively unlimited (tests, in-memory trackers).
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, Duration::from_secs(1))
    }

    /// Claim the next call slot, sleeping until it arrives.
    ///
    /// Fails with `TransientApi` when the backlog puts the slot beyond the
    /// bounded wait; the claimed slot is released again in that case.
    pub async fn acquire(&self) -> Result<()> {
        let wait = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let start_at = (*slot).max(now);
            let wait = start_at - now;

            if wait > self.max_wait {
                return Err(VigilError::TransientApi(format!(
                    "rate limiter backlog exceeds bounded wait ({:?})",
                    self.max_wait
                )));
            }

            *slot = start_at + self.min_interval;
            wait
        };

        if !wait.is_zero() {
            trace!(?wait, "waiting for rate limit slot");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_calls_by_min_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(20), Duration::from_secs(5));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await.expect("acquire");
        }
        // First call is immediate; the next two wait ~20ms each.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn bounded_wait_fails_transient() {
        let limiter = RateLimiter::new(Duration::from_secs(60), Duration::from_millis(10));
        limiter.acquire().await.expect("first slot is immediate");

        let err = limiter.acquire().await.expect_err("backlog beyond bound");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn shared_across_tasks_without_double_booking() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(10),
            Duration::from_secs(5),
        ));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.expect("join").expect("acquire");
        }
        // 4 calls at 10ms spacing: at least 30ms total.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
