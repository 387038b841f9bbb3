//! # Queue Module
//!
//! Implements the per-kind crawl frontier with duplicate detection.
//!
//! ## Overview
//!
//! A `DedupQueue` is the frontier for one entity kind. It is FIFO, backed by a
//! durable `QueueStore` so a crawl can resume after a restart, and paired with
//! the `RecordStore` of the same kind: an id is only enqueued when it is
//! neither already queued nor already stored.
//!
//! ## Key Responsibilities
//!
//! - **Duplicate Detection**: Checks the paired record store and the backing
//!   queue store before appending. Ids confirmed as stored are remembered in a
//!   bounded cache so hot ids skip the store lookup.
//! - **Exclusive Dequeue**: Head lookup and delete run under the queue's pop
//!   lock; no two workers ever receive the same entry.
//! - **Timed Waiting**: Idle workers park on a `Notify` until an enqueue, the
//!   idle deadline or shutdown, instead of polling.
//! - **Requeue**: Failed entries can be put back with their attempt counter
//!   incremented.
//!
//! ## Consistency
//!
//! The store check and the queue insert run under separate lock scopes, so
//! two workers may both enqueue (and later fetch) an id that is being stored
//! concurrently. This is tolerated: the record store's insert-if-absent keeps
//! exactly one record per id.

use crate::error::CrawlError;
use crate::record::{EntityId, QueueEntry, Record};
use crate::shutdown::Shutdown;
use crate::store::{QueueStore, RecordStore};
use moka::sync::Cache;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

const KNOWN_STORED_CAPACITY: u64 = 100_000;

/// FIFO frontier for one entity kind, deduplicated against its record store.
pub struct DedupQueue<R: Record> {
    backing: Arc<dyn QueueStore>,
    paired: Arc<dyn RecordStore<R>>,
    known_stored: Cache<EntityId, ()>,
    pop_lock: Mutex<()>,
    available: Notify,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> DedupQueue<R> {
    pub fn new(backing: Arc<dyn QueueStore>, paired: Arc<dyn RecordStore<R>>) -> Self {
        DedupQueue {
            backing,
            paired,
            known_stored: Cache::builder().max_capacity(KNOWN_STORED_CAPACITY).build(),
            pop_lock: Mutex::new(()),
            available: Notify::new(),
            _record: PhantomData,
        }
    }

    /// Appends `id` unless it is already queued or already stored.
    ///
    /// Returns whether the id was appended.
    pub async fn enqueue(&self, id: EntityId) -> Result<bool, CrawlError> {
        if self.is_stored(&id).await? {
            trace!("{} {} already stored, skipping", R::KIND, id);
            return Ok(false);
        }
        self.push(QueueEntry::new(id)).await
    }

    /// Puts a failed entry back with its attempt counter incremented.
    pub async fn requeue(&self, entry: &QueueEntry) -> Result<bool, CrawlError> {
        if self.is_stored(&entry.id).await? {
            return Ok(false);
        }
        self.push(entry.retried()).await
    }

    /// Puts an entry back unchanged, for work that was never attempted or
    /// for restoring a saved frontier.
    pub async fn restore(&self, entry: QueueEntry) -> Result<bool, CrawlError> {
        if self.is_stored(&entry.id).await? {
            return Ok(false);
        }
        self.push(entry).await
    }

    async fn push(&self, entry: QueueEntry) -> Result<bool, CrawlError> {
        let id = entry.id.clone();
        if !self.backing.insert_if_absent(entry).await? {
            trace!("{} {} already queued, skipping", R::KIND, id);
            return Ok(false);
        }
        trace!("Enqueued {} {}", R::KIND, id);
        self.available.notify_one();
        Ok(true)
    }

    async fn is_stored(&self, id: &EntityId) -> Result<bool, CrawlError> {
        if self.known_stored.contains_key(id) {
            return Ok(true);
        }
        if self.paired.contains(id).await? {
            self.known_stored.insert(id.clone(), ());
            return Ok(true);
        }
        Ok(false)
    }

    /// Records that `id` is now in the paired record store.
    pub fn note_stored(&self, id: &EntityId) {
        self.known_stored.insert(id.clone(), ());
    }

    /// Drops `id` from the known-stored cache. Must follow any delete from
    /// the paired record store, or `enqueue` keeps refusing the id.
    pub fn forget(&self, id: &EntityId) {
        self.known_stored.invalidate(id);
    }

    /// Removes and returns the head entry, or `None` when empty. Never blocks
    /// waiting for work.
    pub async fn dequeue(&self) -> Result<Option<QueueEntry>, CrawlError> {
        let _guard = self.pop_lock.lock().await;
        let Some(entry) = self.backing.first().await? else {
            return Ok(None);
        };
        self.backing.delete(&entry.id).await?;
        trace!("Dequeued {} {}", R::KIND, entry.id);
        Ok(Some(entry))
    }

    /// Dequeues, waiting for an enqueue until `deadline`.
    ///
    /// Returns `None` once the deadline passes with the queue still empty, or
    /// as soon as shutdown is triggered. Never returns `None` before the
    /// deadline unless shutdown was triggered.
    pub async fn dequeue_until(
        &self,
        deadline: Instant,
        shutdown: &Shutdown,
    ) -> Result<Option<QueueEntry>, CrawlError> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shutdown.is_triggered() {
                return Ok(None);
            }
            if let Some(entry) = self.dequeue().await? {
                return Ok(Some(entry));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {
                    trace!("{} queue signalled new work", R::KIND);
                }
                _ = tokio::time::sleep_until(deadline) => {}
                _ = shutdown.wait() => {}
            }
        }
    }

    pub async fn len(&self) -> Result<usize, CrawlError> {
        self.backing.len().await
    }

    pub async fn is_empty(&self) -> Result<bool, CrawlError> {
        Ok(self.len().await? == 0)
    }

    pub async fn contains(&self, id: &EntityId) -> Result<bool, CrawlError> {
        self.backing.contains(id).await
    }

    /// Queued entries in FIFO order, without removing them.
    pub async fn snapshot(&self) -> Result<Vec<QueueEntry>, CrawlError> {
        let entries = self.backing.entries().await?;
        debug!("{} queue snapshot holds {} entries", R::KIND, entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Attributes, ItemRecord, UserRecord};
    use crate::shutdown::StopReason;
    use crate::store::{MemoryQueueStore, MemoryRecordStore};
    use std::collections::HashSet;
    use std::time::Duration;

    fn user(id: &str) -> UserRecord {
        UserRecord::from_parts(id.into(), Attributes::new(), Vec::new(), Vec::new())
    }

    fn user_queue() -> (DedupQueue<UserRecord>, Arc<MemoryRecordStore<UserRecord>>) {
        let records: Arc<MemoryRecordStore<UserRecord>> = Arc::new(MemoryRecordStore::new());
        let queue = DedupQueue::new(Arc::new(MemoryQueueStore::new()), records.clone());
        (queue, records)
    }

    #[tokio::test]
    async fn test_enqueue_skips_queued_and_stored_ids() {
        let (queue, records) = user_queue();
        records.insert_if_absent(user("u1")).await.unwrap();

        assert!(!queue.enqueue("u1".into()).await.unwrap());
        assert!(queue.enqueue("u2".into()).await.unwrap());
        assert!(!queue.enqueue("u2".into()).await.unwrap());

        assert_eq!(queue.len().await.unwrap(), 1);
        assert!(queue.contains(&"u2".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo_and_removes() {
        let (queue, _) = user_queue();
        for id in ["a", "b", "c"] {
            queue.enqueue(id.into()).await.unwrap();
        }

        let order: Vec<_> = [
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.unwrap().id)
        .collect();

        assert_eq!(order, vec![EntityId::from("a"), EntityId::from("b"), EntityId::from("c")]);
        assert!(queue.dequeue().await.unwrap().is_none());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeue_hands_out_each_entry_once() {
        let records: Arc<MemoryRecordStore<ItemRecord>> = Arc::new(MemoryRecordStore::new());
        let queue = Arc::new(DedupQueue::new(Arc::new(MemoryQueueStore::new()), records));
        for n in 0..200u64 {
            queue.enqueue(n.into()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(entry) = queue.dequeue().await.unwrap() {
                    taken.push(entry.id);
                }
                taken
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(id), "entry handed out twice");
            }
        }
        assert_eq!(total, 200);
    }

    #[tokio::test]
    async fn test_requeue_increments_attempts() {
        let (queue, _) = user_queue();
        queue.enqueue("u1".into()).await.unwrap();
        let entry = queue.dequeue().await.unwrap().unwrap();

        assert!(queue.requeue(&entry).await.unwrap());
        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test]
    async fn test_deleted_record_can_be_enqueued_again() {
        let (queue, records) = user_queue();
        records.insert_if_absent(user("u1")).await.unwrap();
        assert!(!queue.enqueue("u1".into()).await.unwrap());

        records.delete(&"u1".into()).await.unwrap();
        queue.forget(&"u1".into());

        assert!(queue.enqueue("u1".into()).await.unwrap());
        assert!(queue.contains(&"u1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_note_stored_blocks_enqueue() {
        let (queue, _) = user_queue();
        queue.note_stored(&"u9".into());
        assert!(!queue.enqueue("u9".into()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_until_waits_full_deadline() {
        let (queue, _) = user_queue();
        let shutdown = Shutdown::new();
        let start = Instant::now();
        let timeout = Duration::from_secs(5);

        let entry = queue.dequeue_until(start + timeout, &shutdown).await.unwrap();

        assert!(entry.is_none());
        assert!(start.elapsed() >= timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_until_wakes_on_enqueue() {
        let (queue, _) = user_queue();
        let queue = Arc::new(queue);
        let shutdown = Arc::new(Shutdown::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_secs(60);
                queue.dequeue_until(deadline, &shutdown).await.unwrap()
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue("u7".into()).await.unwrap();

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.id, EntityId::from("u7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_until_returns_on_shutdown() {
        let (queue, _) = user_queue();
        let queue = Arc::new(queue);
        let shutdown = Arc::new(Shutdown::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let start = Instant::now();
                let entry = queue
                    .dequeue_until(start + Duration::from_secs(60), &shutdown)
                    .await
                    .unwrap();
                (entry, start.elapsed())
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown.trigger(StopReason::Interrupted);

        let (entry, waited) = waiter.await.unwrap();
        assert!(entry.is_none());
        assert!(waited < Duration::from_secs(60));
    }
}
