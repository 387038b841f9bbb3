//! # Store Module
//!
//! Persistence seams for fetched records and for the durable frontier.
//!
//! Both traits mirror the contract of a document store keyed by entity id:
//! insert-if-absent, lookup and delete. No transaction spans two stores, and
//! the crawl does not need one: `RecordStore::insert_if_absent` is the point
//! where duplicate work collapses into a single stored record.
//!
//! The in-memory implementations back tests and single-run crawls; the
//! optional checkpoint file makes them survive restarts.

use crate::error::CrawlError;
use crate::record::{EntityId, QueueEntry, Record};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Idempotent persistence of fetched records of one kind.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// Stores the record unless one with the same id exists.
    ///
    /// Returns whether a write happened. A second insert for an existing id is
    /// ignored; stored records are never replaced.
    async fn insert_if_absent(&self, record: R) -> Result<bool, CrawlError>;

    async fn contains(&self, id: &EntityId) -> Result<bool, CrawlError>;

    async fn get(&self, id: &EntityId) -> Result<Option<R>, CrawlError>;

    /// Removes a record. Crawls should delete through `Frontier`, which also
    /// clears the paired queue's dedup cache.
    async fn delete(&self, id: &EntityId) -> Result<bool, CrawlError>;

    async fn len(&self) -> Result<usize, CrawlError>;

    /// Full scan, for batch jobs and checkpoints.
    async fn records(&self) -> Result<Vec<R>, CrawlError>;
}

/// Durable backing of a frontier queue, keyed by entity id.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends the entry unless its id is already queued.
    async fn insert_if_absent(&self, entry: QueueEntry) -> Result<bool, CrawlError>;

    async fn contains(&self, id: &EntityId) -> Result<bool, CrawlError>;

    /// The oldest entry, without removing it.
    async fn first(&self) -> Result<Option<QueueEntry>, CrawlError>;

    async fn delete(&self, id: &EntityId) -> Result<bool, CrawlError>;

    async fn len(&self) -> Result<usize, CrawlError>;

    /// All entries in FIFO order.
    async fn entries(&self) -> Result<Vec<QueueEntry>, CrawlError>;
}

/// `DashMap`-backed record store.
pub struct MemoryRecordStore<R: Record> {
    records: DashMap<EntityId, R>,
}

impl<R: Record> MemoryRecordStore<R> {
    pub fn new() -> Self {
        MemoryRecordStore {
            records: DashMap::new(),
        }
    }

    /// Builds a store pre-filled with records, keeping the first of any
    /// duplicate ids.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let store = Self::new();
        for record in records {
            store.records.entry(record.id().clone()).or_insert(record);
        }
        store
    }
}

impl<R: Record> Default for MemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for MemoryRecordStore<R> {
    async fn insert_if_absent(&self, record: R) -> Result<bool, CrawlError> {
        match self.records.entry(record.id().clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn contains(&self, id: &EntityId) -> Result<bool, CrawlError> {
        Ok(self.records.contains_key(id))
    }

    async fn get(&self, id: &EntityId) -> Result<Option<R>, CrawlError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, CrawlError> {
        Ok(self.records.remove(id).is_some())
    }

    async fn len(&self) -> Result<usize, CrawlError> {
        Ok(self.records.len())
    }

    async fn records(&self) -> Result<Vec<R>, CrawlError> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

#[derive(Default)]
struct QueueInner {
    order: VecDeque<QueueEntry>,
    members: HashSet<EntityId>,
}

/// Insertion-ordered in-memory queue store.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<QueueInner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store holding `entries` in the given order, skipping repeated
    /// ids.
    pub fn from_entries(entries: impl IntoIterator<Item = QueueEntry>) -> Self {
        let mut inner = QueueInner::default();
        for entry in entries {
            if inner.members.insert(entry.id.clone()) {
                inner.order.push_back(entry);
            }
        }
        MemoryQueueStore {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_if_absent(&self, entry: QueueEntry) -> Result<bool, CrawlError> {
        let mut inner = self.inner.lock();
        if !inner.members.insert(entry.id.clone()) {
            return Ok(false);
        }
        inner.order.push_back(entry);
        Ok(true)
    }

    async fn contains(&self, id: &EntityId) -> Result<bool, CrawlError> {
        Ok(self.inner.lock().members.contains(id))
    }

    async fn first(&self) -> Result<Option<QueueEntry>, CrawlError> {
        Ok(self.inner.lock().order.front().cloned())
    }

    async fn delete(&self, id: &EntityId) -> Result<bool, CrawlError> {
        let mut inner = self.inner.lock();
        if !inner.members.remove(id) {
            return Ok(false);
        }
        if inner.order.front().map(|e| &e.id) == Some(id) {
            inner.order.pop_front();
        } else {
            inner.order.retain(|e| &e.id != id);
        }
        Ok(true)
    }

    async fn len(&self) -> Result<usize, CrawlError> {
        Ok(self.inner.lock().order.len())
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, CrawlError> {
        Ok(self.inner.lock().order.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Attributes, UserRecord};
    use std::sync::Arc;

    fn user(id: &str, username: &str) -> UserRecord {
        let mut attributes = Attributes::new();
        attributes.insert("username".into(), username.into());
        UserRecord::from_parts(id.into(), attributes, Vec::new(), Vec::new())
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_record() {
        let store: MemoryRecordStore<UserRecord> = MemoryRecordStore::new();

        assert!(store.insert_if_absent(user("u1", "first")).await.unwrap());
        assert!(!store.insert_if_absent(user("u1", "second")).await.unwrap());

        assert_eq!(store.len().await.unwrap(), 1);
        let stored = store.get(&"u1".into()).await.unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("first"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_store_one_record() {
        let store: Arc<MemoryRecordStore<UserRecord>> = Arc::new(MemoryRecordStore::new());
        let mut handles = Vec::new();
        for n in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.insert_if_absent(user("u1", &n.to_string())).await.unwrap()
            }));
        }

        let mut writes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                writes += 1;
            }
        }
        assert_eq!(writes, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_delete_and_contains() {
        let store = MemoryRecordStore::from_records(vec![user("u1", "a"), user("u2", "b")]);
        assert!(store.contains(&"u2".into()).await.unwrap());
        assert!(store.delete(&"u2".into()).await.unwrap());
        assert!(!store.delete(&"u2".into()).await.unwrap());
        assert!(!store.contains(&"u2".into()).await.unwrap());
        assert_eq!(store.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_store_is_fifo_and_deduplicated() {
        let store = MemoryQueueStore::new();
        assert!(store.insert_if_absent(QueueEntry::new("a".into())).await.unwrap());
        assert!(store.insert_if_absent(QueueEntry::new("b".into())).await.unwrap());
        assert!(!store.insert_if_absent(QueueEntry::new("a".into())).await.unwrap());

        assert_eq!(store.first().await.unwrap().unwrap().id, EntityId::from("a"));
        assert!(store.delete(&"a".into()).await.unwrap());
        assert_eq!(store.first().await.unwrap().unwrap().id, EntityId::from("b"));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_store_delete_from_middle() {
        let store = MemoryQueueStore::from_entries(
            ["a", "b", "c", "b"].into_iter().map(|id| QueueEntry::new(id.into())),
        );
        assert_eq!(store.len().await.unwrap(), 3);

        assert!(store.delete(&"b".into()).await.unwrap());
        let ids: Vec<_> = store
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![EntityId::from("a"), EntityId::from("c")]);
        assert!(!store.contains(&"b".into()).await.unwrap());
    }
}
