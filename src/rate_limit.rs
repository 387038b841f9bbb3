//! # Rate Limit Module
//!
//! Throttles and counts outbound calls to the content service.
//!
//! Every call waits until a randomized interval, drawn uniformly from
//! `[0, max_jitter]`, has passed since the previously granted call. The wait
//! happens while holding the limiter's lock, so concurrent callers are granted
//! one after another and never burst. The same lock guards the call counter:
//! once it reaches the budget, `acquire` refuses further calls and the crawl
//! is shut down by the supervisor.

use crate::error::CrawlError;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct LimiterState {
    last_granted: Option<Instant>,
    calls: usize,
}

/// Global jittered rate limiter with a hard call budget.
#[derive(Debug)]
pub struct RateLimiter {
    max_jitter: Duration,
    call_budget: usize,
    state: Mutex<LimiterState>,
    // Mirror of `state.calls` for lock-free progress reads.
    calls_made: AtomicUsize,
}

impl RateLimiter {
    pub fn new(max_jitter: Duration, call_budget: usize) -> Self {
        RateLimiter {
            max_jitter,
            call_budget,
            state: Mutex::new(LimiterState::default()),
            calls_made: AtomicUsize::new(0),
        }
    }

    /// Waits for the next call slot and counts the call.
    ///
    /// Returns the 1-based number of the granted call, or
    /// `CallBudgetExceeded` once the budget is spent. A refused call is not
    /// counted.
    pub async fn acquire(&self) -> Result<usize, CrawlError> {
        let mut state = self.state.lock().await;
        if state.calls >= self.call_budget {
            debug!("Call budget of {} exhausted, refusing call", self.call_budget);
            return Err(CrawlError::CallBudgetExceeded {
                budget: self.call_budget,
            });
        }

        let interval = self.next_interval();
        if let Some(last) = state.last_granted {
            let ready_at = last + interval;
            if ready_at > Instant::now() {
                trace!("Rate limiter holding call for {:?}", ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }

        state.last_granted = Some(Instant::now());
        state.calls += 1;
        self.calls_made.store(state.calls, Ordering::SeqCst);
        Ok(state.calls)
    }

    fn next_interval(&self) -> Duration {
        let max_nanos = self.max_jitter.as_nanos().min(u64::MAX as u128) as u64;
        if max_nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..=max_nanos))
    }

    pub fn calls_made(&self) -> usize {
        self.calls_made.load(Ordering::SeqCst)
    }

    pub fn call_budget(&self) -> usize {
        self.call_budget
    }

    pub fn remaining_budget(&self) -> usize {
        self.call_budget.saturating_sub(self.calls_made())
    }

    /// True once the counter has reached the budget.
    pub fn is_exhausted(&self) -> bool {
        self.calls_made() >= self.call_budget
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_counts_calls_and_refuses_past_budget() {
        let limiter = RateLimiter::new(Duration::ZERO, 3);

        for expected in 1..=3 {
            assert_eq!(limiter.acquire().await.unwrap(), expected);
        }
        assert!(limiter.is_exhausted());
        assert_eq!(limiter.remaining_budget(), 0);

        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, CrawlError::CallBudgetExceeded { budget: 3 }));
        assert_eq!(limiter.calls_made(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_calls_are_spaced_within_jitter() {
        let max_jitter = Duration::from_millis(300);
        let limiter = RateLimiter::new(max_jitter, 100);

        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await.unwrap();
        }
        // Nine waits, each bounded by the jitter ceiling.
        assert!(start.elapsed() <= max_jitter * 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquires_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO, 25));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let mut granted = 0;
                while limiter.acquire().await.is_ok() {
                    granted += 1;
                }
                granted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 25);
        assert_eq!(limiter.calls_made(), 25);
    }

    #[test]
    fn test_zero_jitter_interval() {
        let limiter = RateLimiter::new(Duration::ZERO, 1);
        assert_eq!(limiter.next_interval(), Duration::ZERO);
    }
}
