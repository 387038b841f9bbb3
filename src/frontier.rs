//! # Frontier Module
//!
//! Bundles the two frontier queues with the two record stores they are
//! deduplicated against, and provides the operations that touch both sides
//! of the graph at once: seeding, reseeding and record deletion.
//!
//! Reseeding walks every stored record and re-enqueues each neighbour that is
//! neither stored nor queued. It recovers frontier entries lost to failed
//! fetches in earlier runs and can be run before a crawl resumes.

use crate::error::CrawlError;
use crate::queue::DedupQueue;
use crate::record::{EntityId, ItemRecord, Record, UserRecord};
use crate::store::{MemoryQueueStore, MemoryRecordStore, QueueStore, RecordStore};
use std::sync::Arc;
use tracing::{debug, info};

/// The shared graph state: both queues and both record stores.
#[derive(Clone)]
pub struct Frontier {
    pub users: Arc<DedupQueue<UserRecord>>,
    pub items: Arc<DedupQueue<ItemRecord>>,
    pub user_records: Arc<dyn RecordStore<UserRecord>>,
    pub item_records: Arc<dyn RecordStore<ItemRecord>>,
}

impl Frontier {
    pub fn new(
        user_queue: Arc<dyn QueueStore>,
        item_queue: Arc<dyn QueueStore>,
        user_records: Arc<dyn RecordStore<UserRecord>>,
        item_records: Arc<dyn RecordStore<ItemRecord>>,
    ) -> Self {
        Frontier {
            users: Arc::new(DedupQueue::new(user_queue, Arc::clone(&user_records))),
            items: Arc::new(DedupQueue::new(item_queue, Arc::clone(&item_records))),
            user_records,
            item_records,
        }
    }

    /// A frontier backed entirely by empty in-memory stores.
    pub fn in_memory() -> Self {
        Frontier::new(
            Arc::new(MemoryQueueStore::new()),
            Arc::new(MemoryQueueStore::new()),
            Arc::new(MemoryRecordStore::<UserRecord>::new()),
            Arc::new(MemoryRecordStore::<ItemRecord>::new()),
        )
    }

    /// Enqueues seed users, returning how many were new.
    pub async fn seed_users(
        &self,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<usize, CrawlError> {
        let mut added = 0;
        for id in ids {
            debug!("Seeding user {}", id);
            if self.users.enqueue(id).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Deletes a stored user and clears it from the user queue's dedup
    /// cache, so the user can be discovered and crawled again.
    pub async fn delete_user(&self, id: &EntityId) -> Result<bool, CrawlError> {
        delete_record(self.user_records.as_ref(), self.users.as_ref(), id).await
    }

    /// Deletes a stored item; see [`Frontier::delete_user`].
    pub async fn delete_item(&self, id: &EntityId) -> Result<bool, CrawlError> {
        delete_record(self.item_records.as_ref(), self.items.as_ref(), id).await
    }

    /// Re-enqueues every neighbour of a stored record that is neither stored
    /// nor queued. Returns `(users_added, items_added)`.
    pub async fn reseed_from_records(&self) -> Result<(usize, usize), CrawlError> {
        let items_added = enqueue_neighbors(self.user_records.as_ref(), self.items.as_ref()).await?;
        let users_added = enqueue_neighbors(self.item_records.as_ref(), self.users.as_ref()).await?;
        info!(
            "Reseeded frontier from stored records: {} users, {} items",
            users_added, items_added
        );
        Ok((users_added, items_added))
    }
}

async fn delete_record<R: Record>(
    store: &dyn RecordStore<R>,
    queue: &DedupQueue<R>,
    id: &EntityId,
) -> Result<bool, CrawlError> {
    let deleted = store.delete(id).await?;
    queue.forget(id);
    if deleted {
        debug!("Deleted {} {}", R::KIND, id);
    }
    Ok(deleted)
}

async fn enqueue_neighbors<R: Record>(
    store: &dyn RecordStore<R>,
    queue: &DedupQueue<R::Neighbor>,
) -> Result<usize, CrawlError> {
    let mut added = 0;
    for record in store.records().await? {
        for id in record.neighbors() {
            if queue.enqueue(id).await? {
                added += 1;
            }
        }
    }
    Ok(added)
}
