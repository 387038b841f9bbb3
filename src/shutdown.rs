//! Cooperative shutdown signal shared by the supervisor and all workers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// Why a crawl stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum StopReason {
    /// Every worker went idle past its timeout.
    FrontierExhausted,
    CallBudgetExhausted,
    RunDurationElapsed,
    StoreUnavailable(String),
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::FrontierExhausted => write!(f, "frontier exhausted"),
            StopReason::CallBudgetExhausted => write!(f, "call budget exhausted"),
            StopReason::RunDurationElapsed => write!(f, "run duration elapsed"),
            StopReason::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
            StopReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A one-way flag: once triggered it stays triggered, and the first reason
/// wins.
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers shutdown. Returns false if it was already triggered.
    pub fn trigger(&self, reason: StopReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            info!("Shutdown triggered: {}", reason);
            *slot = Some(reason);
        }
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        true
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.lock().clone()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(shutdown.reason().is_none());
        assert!(shutdown.trigger(StopReason::CallBudgetExhausted));
        assert!(!shutdown.trigger(StopReason::Interrupted));
        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.reason(), Some(StopReason::CallBudgetExhausted));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait().await })
        };

        tokio::task::yield_now().await;
        shutdown.trigger(StopReason::RunDurationElapsed);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
