//! # Dimensions Module
//!
//! Batch job deriving per-user artist affinity from crawled records.
//!
//! A user's dimensions map each item owner (the artist) to the number of that
//! owner's items the user has favorited. The job reads the user and item
//! record stores and writes into a separate `DimensionStore`; it never
//! touches the crawl's stores and can run during or after a crawl. Favorites
//! whose item record has not been stored yet are counted as unresolved and
//! left out.

use crate::error::CrawlError;
use crate::record::{EntityId, ItemRecord, UserRecord};
use crate::store::RecordStore;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Owner id to number of favorited items by that owner.
pub type Dimensions = BTreeMap<EntityId, u32>;

/// Derived per-user dimensions, keyed by user id.
#[derive(Debug, Default)]
pub struct DimensionStore {
    users: DashMap<EntityId, Dimensions>,
}

impl DimensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the dimensions of `user`.
    pub fn put(&self, user: EntityId, dimensions: Dimensions) {
        self.users.insert(user, dimensions);
    }

    pub fn get(&self, user: &EntityId) -> Option<Dimensions> {
        self.users.get(user).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Outcome of one dimension job run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DimensionReport {
    pub users: usize,
    pub favorites_resolved: usize,
    pub favorites_unresolved: usize,
}

/// Computes dimensions for one user from the stored item records.
///
/// Returns the dimensions and the number of favorites that could not be
/// resolved to a stored item.
pub async fn user_dimensions(
    user: &UserRecord,
    items: &dyn RecordStore<ItemRecord>,
) -> Result<(Dimensions, usize), CrawlError> {
    let mut dimensions = Dimensions::new();
    let mut unresolved = 0;
    for item_id in &user.favorites {
        match items.get(item_id).await? {
            Some(item) => *dimensions.entry(item.owner_id).or_insert(0) += 1,
            None => unresolved += 1,
        }
    }
    Ok((dimensions, unresolved))
}

/// Recomputes the dimensions of every stored user.
pub async fn build_dimensions(
    users: &dyn RecordStore<UserRecord>,
    items: &dyn RecordStore<ItemRecord>,
    store: &DimensionStore,
) -> Result<DimensionReport, CrawlError> {
    let mut report = DimensionReport::default();
    for user in users.records().await? {
        let (dimensions, unresolved) = user_dimensions(&user, items).await?;
        let resolved: u32 = dimensions.values().sum();
        debug!(
            "User {}: {} artists, {} unresolved favorites",
            user.id,
            dimensions.len(),
            unresolved
        );
        report.users += 1;
        report.favorites_resolved += resolved as usize;
        report.favorites_unresolved += unresolved;
        store.put(user.id, dimensions);
    }
    info!(
        "Built dimensions for {} users ({} favorites resolved, {} unresolved)",
        report.users, report.favorites_resolved, report.favorites_unresolved
    );
    Ok(report)
}
