//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring
//! `CrawlSupervisor` instances.
//!
//! ## Overview
//!
//! The builder gathers the content client, the four stores, the seed ids and
//! the run configuration, validates them, restores a checkpoint when one is
//! configured and wires everything into a ready-to-run supervisor.
//!
//! ## Key Features
//!
//! - **Concurrency Configuration**: Size the user and item worker pools
//!   independently
//! - **Run Limits**: Call budget, run duration and per-worker idle timeout
//! - **Pluggable Storage**: In-memory stores by default, or any `QueueStore`
//!   and `RecordStore` implementation
//! - **Failure Policy**: Drop failed work, or retry and requeue it
//! - **Checkpoint Management**: Save and resume the frontier (feature:
//!   `checkpoint`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use favcrawl_core::CrawlerBuilder;
//!
//! async fn crawl(client: MyClient) -> Result<(), CrawlError> {
//!     let crawler = CrawlerBuilder::new(client)
//!         .seed("183")
//!         .user_workers(4)
//!         .item_workers(4)
//!         .call_budget(5_000)
//!         .with_checkpoint_path("./crawl.checkpoint")
//!         .build()
//!         .await?;
//!
//!     let report = crawler.start_crawl().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

use crate::client::{ContentClient, FailurePolicy, Fetcher};
use crate::crawler::CrawlSupervisor;
use crate::error::CrawlError;
use crate::frontier::Frontier;
use crate::rate_limit::RateLimiter;
use crate::record::EntityId;
use crate::stats::StatCollector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "checkpoint")]
use crate::checkpoint::load_checkpoint;
#[cfg(feature = "checkpoint")]
use std::path::{Path, PathBuf};

/// Run configuration for a crawl.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Number of user workers.
    pub user_workers: usize,
    /// Number of item workers.
    pub item_workers: usize,
    /// How long a worker waits on an empty queue before exiting.
    pub idle_timeout: Duration,
    /// Maximum number of outbound calls for the whole run.
    pub call_budget: usize,
    /// Wall-clock limit for the whole run.
    pub run_duration: Duration,
    /// Upper bound of the random delay between consecutive outbound calls.
    pub max_jitter: Duration,
    /// How often the supervisor logs progress.
    pub progress_interval: Duration,
    /// How long in-flight work may take to finish once shutdown begins.
    pub shutdown_grace: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            user_workers: num_cpus::get().clamp(2, 8),
            item_workers: num_cpus::get().clamp(2, 8),
            idle_timeout: Duration::from_secs(10),
            call_budget: 5_000,
            run_duration: Duration::from_secs(60 * 60),
            max_jitter: Duration::from_millis(300),
            progress_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl CrawlConfig {
    fn validate(&self) -> Result<(), CrawlError> {
        if self.user_workers == 0 {
            return Err(CrawlError::Configuration(
                "user_workers must be greater than 0.".to_string(),
            ));
        }
        if self.item_workers == 0 {
            return Err(CrawlError::Configuration(
                "item_workers must be greater than 0.".to_string(),
            ));
        }
        if self.call_budget == 0 {
            return Err(CrawlError::Configuration(
                "call_budget must be greater than 0.".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(CrawlError::Configuration(
                "idle_timeout must be greater than 0.".to_string(),
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(CrawlError::Configuration(
                "progress_interval must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct CrawlerBuilder {
    config: CrawlConfig,
    client: Arc<dyn ContentClient>,
    frontier: Option<Frontier>,
    seeds: Vec<EntityId>,
    reseed: bool,
    #[cfg(feature = "checkpoint")]
    checkpoint_path: Option<PathBuf>,
    #[cfg(feature = "checkpoint")]
    checkpoint_interval: Option<Duration>,
}

impl CrawlerBuilder {
    /// Creates a new `CrawlerBuilder` around a content client, with the default
    /// configuration and in-memory stores.
    pub fn new<C: ContentClient + 'static>(client: C) -> Self {
        Self::from_client(Arc::new(client))
    }

    /// Creates a new `CrawlerBuilder` around an already shared content client.
    pub fn from_client(client: Arc<dyn ContentClient>) -> Self {
        CrawlerBuilder {
            config: CrawlConfig::default(),
            client,
            frontier: None,
            seeds: Vec::new(),
            reseed: false,
            #[cfg(feature = "checkpoint")]
            checkpoint_path: None,
            #[cfg(feature = "checkpoint")]
            checkpoint_interval: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CrawlConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a seed user id.
    pub fn seed(mut self, id: impl Into<EntityId>) -> Self {
        self.seeds.push(id.into());
        self
    }

    /// Adds several seed user ids.
    pub fn seeds<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        self.seeds.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Sets the number of user workers.
    pub fn user_workers(mut self, count: usize) -> Self {
        self.config.user_workers = count;
        self
    }

    /// Sets the number of item workers.
    pub fn item_workers(mut self, count: usize) -> Self {
        self.config.item_workers = count;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn call_budget(mut self, budget: usize) -> Self {
        self.config.call_budget = budget;
        self
    }

    pub fn run_duration(mut self, duration: Duration) -> Self {
        self.config.run_duration = duration;
        self
    }

    /// Sets the upper bound of the random delay between outbound calls.
    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.config.max_jitter = jitter;
        self
    }

    pub fn progress_interval(mut self, every: Duration) -> Self {
        self.config.progress_interval = every;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Uses the given queues and record stores instead of fresh in-memory ones.
    pub fn frontier(mut self, frontier: Frontier) -> Self {
        self.frontier = Some(frontier);
        self
    }

    /// Re-enqueues unvisited neighbours of stored records before starting.
    pub fn reseed_from_records(mut self, reseed: bool) -> Self {
        self.reseed = reseed;
        self
    }

    /// Enables checkpointing and sets the path for the checkpoint file.
    #[cfg(feature = "checkpoint")]
    pub fn with_checkpoint_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.checkpoint_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the interval for periodic checkpointing.
    #[cfg(feature = "checkpoint")]
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    /// Validates the configuration, restores any checkpoint and builds the
    /// `CrawlSupervisor`.
    pub async fn build(self) -> Result<CrawlSupervisor, CrawlError> {
        self.config.validate()?;
        let frontier = self.frontier.unwrap_or_else(Frontier::in_memory);

        #[cfg(feature = "checkpoint")]
        {
            if let Some(path) = &self.checkpoint_path {
                debug!("Attempting to load checkpoint from {:?}", path);
                match load_checkpoint(path)? {
                    Some(checkpoint) => checkpoint.restore_into(&frontier).await?,
                    None => debug!("No checkpoint at {:?}, starting fresh", path),
                }
            }
        }

        if self.seeds.is_empty() && !self.reseed {
            let pending = frontier.users.len().await? + frontier.items.len().await?;
            if pending == 0 {
                return Err(CrawlError::Configuration(
                    "Crawler needs at least one seed id or a non-empty frontier.".to_string(),
                ));
            }
        }

        let limiter = Arc::new(RateLimiter::new(
            self.config.max_jitter,
            self.config.call_budget,
        ));
        let stats = Arc::new(StatCollector::new(Arc::clone(&limiter)));
        let fetcher = Arc::new(Fetcher::new(
            self.client,
            limiter,
            self.config.failure_policy.clone(),
            Arc::clone(&stats),
        ));
        debug!("Crawler built with {:?}", self.config);

        Ok(CrawlSupervisor::new(
            self.config,
            frontier,
            fetcher,
            stats,
            self.seeds,
            self.reseed,
            #[cfg(feature = "checkpoint")]
            self.checkpoint_path,
            #[cfg(feature = "checkpoint")]
            self.checkpoint_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Attributes;
    use async_trait::async_trait;

    struct NullClient;

    #[async_trait]
    impl ContentClient for NullClient {
        async fn get_user(&self, _id: &EntityId) -> anyhow::Result<Attributes> {
            Ok(Attributes::new())
        }

        async fn get_user_favorites(&self, _id: &EntityId) -> anyhow::Result<Vec<EntityId>> {
            Ok(Vec::new())
        }

        async fn get_user_followers(&self, _id: &EntityId) -> anyhow::Result<Vec<EntityId>> {
            Ok(Vec::new())
        }

        async fn get_item(&self, _id: &EntityId) -> anyhow::Result<Attributes> {
            Ok(Attributes::new())
        }

        async fn get_item_favoriters(&self, _id: &EntityId) -> anyhow::Result<Vec<EntityId>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CrawlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_jitter, Duration::from_millis(300));
        assert_eq!(config.failure_policy, FailurePolicy::drop_failed());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: CrawlConfig =
            serde_json::from_str(r#"{"user_workers": 3, "call_budget": 42}"#).unwrap();
        assert_eq!(config.user_workers, 3);
        assert_eq!(config.call_budget, 42);
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let result = CrawlerBuilder::new(NullClient)
            .seed("u1")
            .item_workers(0)
            .build()
            .await;
        assert!(matches!(result, Err(CrawlError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_seedless_empty_frontier_rejected() {
        let result = CrawlerBuilder::new(NullClient).build().await;
        assert!(matches!(result, Err(CrawlError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_prefilled_frontier_needs_no_seed() {
        let frontier = Frontier::in_memory();
        frontier.items.enqueue("t1".into()).await.unwrap();

        let crawler = CrawlerBuilder::new(NullClient)
            .frontier(frontier)
            .build()
            .await
            .unwrap();
        assert_eq!(crawler.frontier().items.len().await.unwrap(), 1);
    }
}
