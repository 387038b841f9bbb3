//! Module for tracking the operational state of the worker pools.
//!
//! This module defines the `CrawlerState` struct, which provides a centralized
//! view of what every worker is doing right now. It utilizes atomic counters
//! to keep track of, per entity kind:
//! - The number of workers processing an entry (`Working`).
//! - The number of workers waiting on an empty queue (`Idle`).
//! - The number of workers that have exited (`Terminated`).
//!
//! The supervisor reads it for progress reports; workers update it on every
//! state transition.

use crate::record::EntityKind;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle of a single worker. `Terminated` is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Working,
    Idle,
    Terminated,
}

#[derive(Debug, Default)]
struct PoolState {
    working: AtomicUsize,
    idle: AtomicUsize,
    terminated: AtomicUsize,
}

impl PoolState {
    fn counter(&self, status: WorkerStatus) -> &AtomicUsize {
        match status {
            WorkerStatus::Working => &self.working,
            WorkerStatus::Idle => &self.idle,
            WorkerStatus::Terminated => &self.terminated,
        }
    }
}

/// Worker counts by status for one pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub working: usize,
    pub idle: usize,
    pub terminated: usize,
}

/// Represents the shared state of both worker pools.
#[derive(Debug, Default)]
pub struct CrawlerState {
    users: PoolState,
    items: PoolState,
}

impl CrawlerState {
    /// Creates a new, atomically reference-counted `CrawlerState`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn pool(&self, kind: EntityKind) -> &PoolState {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Item => &self.items,
        }
    }

    /// Registers a freshly started worker, which begins `Idle`.
    pub(crate) fn worker_started(&self, kind: EntityKind) {
        self.pool(kind).idle.fetch_add(1, Ordering::SeqCst);
    }

    /// Moves one worker of `kind` between statuses.
    pub(crate) fn transition(&self, kind: EntityKind, from: WorkerStatus, to: WorkerStatus) {
        if from == to {
            return;
        }
        let pool = self.pool(kind);
        pool.counter(from).fetch_sub(1, Ordering::SeqCst);
        pool.counter(to).fetch_add(1, Ordering::SeqCst);
    }

    pub fn counts(&self, kind: EntityKind) -> PoolCounts {
        let pool = self.pool(kind);
        PoolCounts {
            working: pool.working.load(Ordering::SeqCst),
            idle: pool.idle.load(Ordering::SeqCst),
            terminated: pool.terminated.load(Ordering::SeqCst),
        }
    }

    /// Checks if no worker of either kind is processing an entry.
    pub fn is_idle(&self) -> bool {
        self.users.working.load(Ordering::SeqCst) == 0
            && self.items.working.load(Ordering::SeqCst) == 0
    }
}
