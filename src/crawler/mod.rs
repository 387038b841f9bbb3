//! # Crawler Module
//!
//! Implements the crawl engine: the supervisor and the workers it runs.
//!
//! ## Overview
//!
//! The crawl walks a bipartite graph of users and items. User workers fetch a
//! user, store it and enqueue the user's favorited items; item workers fetch
//! an item, store it and enqueue the users who favorited it. Both pools share
//! one rate limiter and one call budget.
//!
//! ## Key Components
//!
//! - **CrawlSupervisor**: Seeds the frontier, runs both worker pools and
//!   decides when the crawl stops
//! - **EntityWorker**: The loop run by every worker, generic over the record
//!   kind it processes
//!
//! ## Architecture
//!
//! Every worker is a Tokio task. Workers never talk to each other directly;
//! they only meet through the shared queues and stores. Run-level failures
//! travel to the supervisor over a bounded channel, and shutdown travels back
//! through a shared `Shutdown` signal.

mod core;
mod worker;

pub use core::{CrawlReport, CrawlSupervisor};
