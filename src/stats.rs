//! # Statistics Module
//!
//! Collects and stores progress metrics about a running crawl.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every worker and by the supervisor. Each
//! entity kind gets its own set of counters; the supervisor samples them
//! periodically for progress logging and folds a final snapshot into the
//! `CrawlReport`. None of these counters take part in crawl decisions.
//!
//! ## Key Metrics Tracked
//!
//! - **Per kind**: records processed (stored), ids enqueued, duplicate inserts,
//!   fetch failures, records skipped for missing fields, work dropped and work
//!   requeued
//! - **Calls**: outbound calls made, read from the shared `RateLimiter`, and
//!   retries
//! - **Timing**: elapsed time and processing rates
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = StatCollector::new(Arc::clone(&limiter));
//! stats.increment_processed(EntityKind::User);
//! println!("{}", stats.to_markdown_string());
//! ```

use crate::error::CrawlError;
use crate::rate_limit::RateLimiter;
use crate::record::EntityKind;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters for one entity kind.
#[derive(Debug, Default)]
struct KindStats {
    processed: AtomicUsize,
    enqueued: AtomicUsize,
    duplicates: AtomicUsize,
    fetch_failed: AtomicUsize,
    skipped: AtomicUsize,
    dropped: AtomicUsize,
    requeued: AtomicUsize,
}

impl KindStats {
    fn snapshot(&self) -> KindSnapshot {
        KindSnapshot {
            processed: self.processed.load(Ordering::SeqCst),
            enqueued: self.enqueued.load(Ordering::SeqCst),
            duplicates: self.duplicates.load(Ordering::SeqCst),
            fetch_failed: self.fetch_failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            requeued: self.requeued.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time counters for one entity kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KindSnapshot {
    pub processed: usize,
    pub enqueued: usize,
    pub duplicates: usize,
    pub fetch_failed: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub requeued: usize,
}

/// A consistent copy of all counters, used for reporting.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub users: KindSnapshot,
    pub items: KindSnapshot,
    pub calls_made: usize,
    pub retries: usize,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    fn formatted_duration(&self) -> String {
        format!("{:?}", self.elapsed)
    }

    fn per_second(&self, count: usize) -> f64 {
        let total_seconds = self.elapsed.as_secs_f64();
        if total_seconds > 0.0 {
            count as f64 / total_seconds
        } else {
            0.0
        }
    }
}

/// Collects and stores statistics about the crawl.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    users: KindStats,
    items: KindStats,
    limiter: Arc<RateLimiter>,
    retries: AtomicUsize,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters at zero. Calls are
    /// counted by `limiter` alone.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        StatCollector {
            start_time: Instant::now(),
            users: KindStats::default(),
            items: KindStats::default(),
            limiter,
            retries: AtomicUsize::new(0),
        }
    }

    fn kind(&self, kind: EntityKind) -> &KindStats {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Item => &self.items,
        }
    }

    /// Copies every counter at once.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            users: self.users.snapshot(),
            items: self.items.snapshot(),
            calls_made: self.limiter.calls_made(),
            retries: self.retries.load(Ordering::SeqCst),
            elapsed: self.start_time.elapsed(),
        }
    }

    /// Number of records of `kind` stored by this run.
    pub fn processed(&self, kind: EntityKind) -> usize {
        self.kind(kind).processed.load(Ordering::SeqCst)
    }

    pub fn calls_made(&self) -> usize {
        self.limiter.calls_made()
    }

    pub(crate) fn increment_processed(&self, kind: EntityKind) {
        self.kind(kind).processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_enqueued(&self, kind: EntityKind) {
        self.kind(kind).enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_duplicates(&self, kind: EntityKind) {
        self.kind(kind).duplicates.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_fetch_failed(&self, kind: EntityKind) {
        self.kind(kind).fetch_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_skipped(&self, kind: EntityKind) {
        self.kind(kind).skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_dropped(&self, kind: EntityKind) {
        self.kind(kind).dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requeued(&self, kind: EntityKind) {
        self.kind(kind).requeued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Converts the current snapshot into a JSON string.
    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Converts the current snapshot into a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();
        let u = &snapshot.users;
        let i = &snapshot.items;

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {}
- **Average Speed**: {:.2} calls/s, {:.2} users/s, {:.2} items/s
- **Calls**: {} made, {} retried

| Metric       | Users | Items |
|--------------|-------|-------|
| Processed    | {}     | {}     |
| Enqueued     | {}     | {}     |
| Duplicates   | {}     | {}     |
| Fetch failed | {}     | {}     |
| Skipped      | {}     | {}     |
| Dropped      | {}     | {}     |
| Requeued     | {}     | {}     |
"#,
            snapshot.formatted_duration(),
            snapshot.per_second(snapshot.calls_made),
            snapshot.per_second(u.processed),
            snapshot.per_second(i.processed),
            snapshot.calls_made,
            snapshot.retries,
            u.processed,
            i.processed,
            u.enqueued,
            i.enqueued,
            u.duplicates,
            i.duplicates,
            u.fetch_failed,
            i.fetch_failed,
            u.skipped,
            i.skipped,
            u.dropped,
            i.dropped,
            u.requeued,
            i.requeued,
        )
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {}", snapshot.formatted_duration())?;
        writeln!(
            f,
            "  calls    : made: {}, retried: {}, calls/s: {:.2}",
            snapshot.calls_made,
            snapshot.retries,
            snapshot.per_second(snapshot.calls_made)
        )?;
        for (label, k) in [("users", &snapshot.users), ("items", &snapshot.items)] {
            writeln!(
                f,
                "  {:<8} : processed: {}, enqueued: {}, dup: {}, fail: {}, skip: {}, drop: {}, requeue: {}",
                label, k.processed, k.enqueued, k.duplicates, k.fetch_failed, k.skipped, k.dropped, k.requeued
            )?;
        }
        Ok(())
    }
}
