//! A "prelude" for users of the `favcrawl-core` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use favcrawl_core::prelude::*;
//! ```

pub use crate::{
    // Core structs
    CrawlConfig,
    CrawlReport,
    CrawlSupervisor,
    CrawlerBuilder,
    EntityId,
    FailurePolicy,
    ItemRecord,
    StopReason,
    UserRecord,
    // Core traits
    ContentClient,
    QueueStore,
    Record,
    RecordStore,
    // Errors
    CrawlError,
    // Essential re-exports for trait implementation
    async_trait,
};
