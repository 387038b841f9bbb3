//! # Client Module
//!
//! The content-service seam and the rate-limited fetcher built on top of it.
//!
//! `ContentClient` is the typed surface the crawl needs from the service; any
//! HTTP or SDK binding implements it. `Fetcher` wraps a client with the
//! shared `RateLimiter` and the configured retry behaviour: every outbound
//! call first acquires a permit from the limiter, so every call (including
//! retries) is throttled and counted against the call budget.

use crate::error::CrawlError;
use crate::rate_limit::RateLimiter;
use crate::record::{Attributes, EntityId, EntityKind, ItemRecord, UserRecord};
use crate::stats::StatCollector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Operations the crawl needs from the content service.
#[async_trait]
pub trait ContentClient: Send + Sync {
    async fn get_user(&self, id: &EntityId) -> anyhow::Result<Attributes>;

    /// Favorited item ids, in service order.
    async fn get_user_favorites(&self, id: &EntityId) -> anyhow::Result<Vec<EntityId>>;

    async fn get_user_followers(&self, id: &EntityId) -> anyhow::Result<Vec<EntityId>>;

    async fn get_item(&self, id: &EntityId) -> anyhow::Result<Attributes>;

    async fn get_item_favoriters(&self, id: &EntityId) -> anyhow::Result<Vec<EntityId>>;
}

/// What happens to a unit of work whose fetch keeps failing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Immediate retries of a single failed call before giving up on it.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
    /// Put the id back on its queue once retries are exhausted.
    pub requeue: bool,
    /// Maximum number of requeues per id before it is dropped for the run.
    pub max_requeues: u32,
}

impl FailurePolicy {
    /// Drop failed work immediately, without retrying.
    pub fn drop_failed() -> Self {
        FailurePolicy {
            max_retries: 0,
            backoff: Duration::ZERO,
            requeue: false,
            max_requeues: 0,
        }
    }

    /// Retry each call with exponential backoff, then requeue the id a bounded
    /// number of times.
    pub fn retry_then_requeue(max_retries: u32, backoff: Duration, max_requeues: u32) -> Self {
        FailurePolicy {
            max_retries,
            backoff,
            requeue: true,
            max_requeues,
        }
    }

    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::drop_failed()
    }
}

/// Rate-limited, budget-counted access to a `ContentClient`.
pub struct Fetcher {
    client: Arc<dyn ContentClient>,
    limiter: Arc<RateLimiter>,
    policy: FailurePolicy,
    stats: Arc<StatCollector>,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn ContentClient>,
        limiter: Arc<RateLimiter>,
        policy: FailurePolicy,
        stats: Arc<StatCollector>,
    ) -> Self {
        Fetcher {
            client,
            limiter,
            policy,
            stats,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Fetches a user's profile, favorites and followers (three calls).
    pub async fn fetch_user(&self, id: &EntityId) -> Result<UserRecord, CrawlError> {
        let kind = EntityKind::User;
        debug!("Querying user {} for general info", id);
        let attributes = self.call(kind, id, "get_user", || self.client.get_user(id)).await?;
        let favorites = self
            .call(kind, id, "get_user_favorites", || self.client.get_user_favorites(id))
            .await?;
        let followers = self
            .call(kind, id, "get_user_followers", || self.client.get_user_followers(id))
            .await?;
        Ok(UserRecord::from_parts(id.clone(), attributes, favorites, followers))
    }

    /// Fetches an item and its favoriters (two calls).
    pub async fn fetch_item(&self, id: &EntityId) -> Result<ItemRecord, CrawlError> {
        let kind = EntityKind::Item;
        debug!("Querying item {} for general info", id);
        let attributes = self.call(kind, id, "get_item", || self.client.get_item(id)).await?;
        let favoriters = self
            .call(kind, id, "get_item_favoriters", || self.client.get_item_favoriters(id))
            .await?;
        ItemRecord::from_parts(id.clone(), attributes, favoriters)
    }

    async fn call<T, F, Fut>(
        &self,
        kind: EntityKind,
        id: &EntityId,
        operation: &'static str,
        request: F,
    ) -> Result<T, CrawlError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let call_number = self.limiter.acquire().await?;
            trace!("Call #{} {} for {} {}", call_number, operation, kind, id);

            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        "{} for {} {} failed (attempt {}), retrying in {:?}: {:#}",
                        operation,
                        kind,
                        id,
                        attempt + 1,
                        delay,
                        e
                    );
                    self.stats.increment_retries();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(CrawlError::TransientFetch {
                        kind,
                        id: id.clone(),
                        source: e.context(operation),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves one fixed user and one item; fails the first `failures` calls.
    struct FlakyClient {
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyClient {
        fn new(failures: usize) -> Self {
            FlakyClient {
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }

        fn tick(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("connection reset");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ContentClient for FlakyClient {
        async fn get_user(&self, _id: &EntityId) -> anyhow::Result<Attributes> {
            self.tick()?;
            Ok(json!({"username": "a"}).as_object().cloned().unwrap_or_default())
        }

        async fn get_user_favorites(&self, _id: &EntityId) -> anyhow::Result<Vec<EntityId>> {
            self.tick()?;
            Ok(vec!["t1".into(), "t2".into()])
        }

        async fn get_user_followers(&self, _id: &EntityId) -> anyhow::Result<Vec<EntityId>> {
            self.tick()?;
            Ok(vec!["u2".into()])
        }

        async fn get_item(&self, _id: &EntityId) -> anyhow::Result<Attributes> {
            self.tick()?;
            Ok(json!({"title": "no owner"}).as_object().cloned().unwrap_or_default())
        }

        async fn get_item_favoriters(&self, _id: &EntityId) -> anyhow::Result<Vec<EntityId>> {
            self.tick()?;
            Ok(Vec::new())
        }
    }

    fn fetcher(client: Arc<FlakyClient>, budget: usize, policy: FailurePolicy) -> Fetcher {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO, budget));
        let stats = Arc::new(StatCollector::new(Arc::clone(&limiter)));
        Fetcher::new(client, limiter, policy, stats)
    }

    #[tokio::test]
    async fn test_fetch_user_uses_three_calls() {
        let client = Arc::new(FlakyClient::new(0));
        let fetcher = fetcher(client.clone(), 10, FailurePolicy::default());

        let user = fetcher.fetch_user(&"u1".into()).await.unwrap();

        assert_eq!(user.favorites, vec![EntityId::from("t1"), EntityId::from("t2")]);
        assert_eq!(fetcher.limiter().calls_made(), 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_default_policy_does_not_retry() {
        let client = Arc::new(FlakyClient::new(1));
        let fetcher = fetcher(client.clone(), 10, FailurePolicy::default());

        let err = fetcher.fetch_user(&"u1".into()).await.unwrap_err();

        assert!(matches!(err, CrawlError::TransientFetch { kind: EntityKind::User, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_consume_budget() {
        let client = Arc::new(FlakyClient::new(2));
        let policy = FailurePolicy::retry_then_requeue(3, Duration::from_millis(10), 1);
        let fetcher = fetcher(client.clone(), 10, policy);

        fetcher.fetch_user(&"u1".into()).await.unwrap();

        assert_eq!(fetcher.limiter().calls_made(), 5);
        assert_eq!(fetcher.stats.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_budget_stops_fetch_midway() {
        let client = Arc::new(FlakyClient::new(0));
        let fetcher = fetcher(client.clone(), 2, FailurePolicy::default());

        let err = fetcher.fetch_user(&"u1".into()).await.unwrap_err();

        assert!(matches!(err, CrawlError::CallBudgetExceeded { budget: 2 }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_item_without_owner_is_skipped() {
        let client = Arc::new(FlakyClient::new(0));
        let fetcher = fetcher(client, 10, FailurePolicy::default());

        let err = fetcher.fetch_item(&"t1".into()).await.unwrap_err();
        assert!(matches!(err, CrawlError::MissingField { field: "user_id", .. }));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = FailurePolicy::retry_then_requeue(3, Duration::from_millis(100), 2);
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
    }
}
