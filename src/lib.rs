//! # favcrawl-core
//!
//! Bidirectional breadth-first crawler over a user/item favorites graph.
//!
//! Starting from seed users, the crawl alternates between the two sides of a
//! bipartite graph: each user leads to the items they favorited, each item to
//! the users who favorited it. Both sides run their own worker pool, queue and
//! record store. All outbound calls share one jittered rate limiter and a
//! global call budget.
//!
//! Provides the main components: `CrawlerBuilder`, `CrawlSupervisor`, the
//! `ContentClient` seam to the content service, and the `QueueStore` and
//! `RecordStore` storage seams with in-memory implementations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use favcrawl_core::prelude::*;
//!
//! struct MyClient;
//!
//! #[async_trait]
//! impl ContentClient for MyClient {
//!     // get_user, get_user_favorites, get_user_followers,
//!     // get_item, get_item_favoriters
//! }
//!
//! async fn run_crawler() -> Result<(), CrawlError> {
//!     let crawler = CrawlerBuilder::new(MyClient).seed("183").build().await?;
//!     let report = crawler.start_crawl().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod builder;
#[cfg(feature = "checkpoint")]
pub mod checkpoint;
pub mod client;
pub mod crawler;
pub mod dimensions;
pub mod error;
pub mod frontier;
pub mod prelude;
pub mod queue;
pub mod rate_limit;
pub mod record;
pub mod shutdown;
pub mod state;
pub mod stats;
pub mod store;

#[cfg(feature = "checkpoint")]
pub use checkpoint::Checkpoint;

pub use builder::{CrawlConfig, CrawlerBuilder};
pub use client::{ContentClient, FailurePolicy, Fetcher};
pub use crawler::{CrawlReport, CrawlSupervisor};
pub use dimensions::{build_dimensions, DimensionStore};
pub use error::CrawlError;
pub use frontier::Frontier;
pub use queue::DedupQueue;
pub use rate_limit::RateLimiter;
pub use record::{Attributes, EntityId, EntityKind, ItemRecord, QueueEntry, Record, UserRecord};
pub use shutdown::{Shutdown, StopReason};
pub use stats::StatCollector;
pub use store::{MemoryQueueStore, MemoryRecordStore, QueueStore, RecordStore};

pub use async_trait::async_trait;
pub use tokio;
