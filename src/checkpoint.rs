//! # Checkpoint Module
//!
//! Saves and restores the crawl frontier so an interrupted crawl can resume.
//!
//! ## Overview
//!
//! A `Checkpoint` captures both queues (with their attempt counters) and both
//! record stores. The supervisor writes one periodically when an interval is
//! configured and always writes a final one on shutdown; the builder reads it
//! back into the configured stores before the crawl starts.
//!
//! ## Implementation Details
//!
//! Checkpoints are MessagePack encoded. Saves go to a temporary file that is
//! renamed over the target, so a crash mid-write never leaves a truncated
//! checkpoint behind.
//!
//! ## Example
//!
//! ```rust,ignore
//! use favcrawl_core::checkpoint::{load_checkpoint, save_checkpoint};
//!
//! save_checkpoint(Path::new("./crawl.checkpoint"), &frontier).await?;
//! if let Some(checkpoint) = load_checkpoint(Path::new("./crawl.checkpoint"))? {
//!     checkpoint.restore_into(&frontier).await?;
//! }
//! ```

use crate::error::CrawlError;
use crate::frontier::Frontier;
use crate::record::{ItemRecord, QueueEntry, UserRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// A complete snapshot of the crawl frontier.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    /// Pending user ids, in queue order.
    pub user_queue: Vec<QueueEntry>,
    /// Pending item ids, in queue order.
    pub item_queue: Vec<QueueEntry>,
    pub user_records: Vec<UserRecord>,
    pub item_records: Vec<ItemRecord>,
}

impl Checkpoint {
    /// Copies the current contents of every store in `frontier`.
    pub async fn capture(frontier: &Frontier) -> Result<Self, CrawlError> {
        Ok(Checkpoint {
            user_queue: frontier.users.snapshot().await?,
            item_queue: frontier.items.snapshot().await?,
            user_records: frontier.user_records.records().await?,
            item_records: frontier.item_records.records().await?,
        })
    }

    /// Loads records first, then the queues, so a queued id that was stored
    /// in the meantime is not put back.
    pub async fn restore_into(self, frontier: &Frontier) -> Result<(), CrawlError> {
        let mut restored = (0, 0, 0, 0);
        for record in self.user_records {
            if frontier.user_records.insert_if_absent(record).await? {
                restored.0 += 1;
            }
        }
        for record in self.item_records {
            if frontier.item_records.insert_if_absent(record).await? {
                restored.1 += 1;
            }
        }
        for entry in self.user_queue {
            if frontier.users.restore(entry).await? {
                restored.2 += 1;
            }
        }
        for entry in self.item_queue {
            if frontier.items.restore(entry).await? {
                restored.3 += 1;
            }
        }
        info!(
            "Restored checkpoint: {} users and {} items stored, {} users and {} items queued",
            restored.0, restored.1, restored.2, restored.3
        );
        Ok(())
    }
}

pub async fn save_checkpoint(path: &Path, frontier: &Frontier) -> Result<(), CrawlError> {
    info!("Saving checkpoint to {:?}", path);
    let checkpoint = Checkpoint::capture(frontier).await?;

    let tmp_path = path.with_extension("tmp");
    let encoded = rmp_serde::to_vec(&checkpoint)
        .map_err(|e| CrawlError::Checkpoint(format!("Failed to serialize checkpoint: {}", e)))?;
    fs::write(&tmp_path, encoded).map_err(|e| {
        CrawlError::Checkpoint(format!(
            "Failed to write checkpoint to temporary file: {}",
            e
        ))
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        CrawlError::Checkpoint(format!("Failed to rename temporary checkpoint file: {}", e))
    })?;

    debug!(
        "Checkpoint saved: {} users queued, {} items queued",
        checkpoint.user_queue.len(),
        checkpoint.item_queue.len()
    );
    Ok(())
}

/// Reads a checkpoint, returning `None` if the file does not exist.
pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CrawlError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CrawlError::Checkpoint(format!(
                "Failed to read checkpoint file {:?}: {}",
                path, e
            )))
        }
    };
    let checkpoint = rmp_serde::from_slice::<Checkpoint>(&bytes).map_err(|e| {
        CrawlError::Checkpoint(format!("Failed to deserialize checkpoint from {:?}: {}", path, e))
    })?;
    Ok(Some(checkpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Attributes, EntityId};
    use serde_json::json;

    #[tokio::test]
    async fn test_checkpoint_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.checkpoint");

        let frontier = Frontier::in_memory();
        let attributes = json!({"username": "first", "followers_count": 12})
            .as_object()
            .cloned()
            .unwrap();
        let user = UserRecord::from_parts("u1".into(), attributes, vec!["t1".into()], Vec::new());
        frontier.user_records.insert_if_absent(user).await.unwrap();
        frontier.items.enqueue("t1".into()).await.unwrap();
        frontier.users.enqueue("u2".into()).await.unwrap();
        let failed = frontier.users.dequeue().await.unwrap().unwrap();
        frontier.users.requeue(&failed).await.unwrap();

        save_checkpoint(&path, &frontier).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let resumed = Frontier::in_memory();
        load_checkpoint(&path)
            .unwrap()
            .unwrap()
            .restore_into(&resumed)
            .await
            .unwrap();

        let stored = resumed.user_records.get(&"u1".into()).await.unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("first"));
        assert_eq!(stored.followers_count, Some(12));
        assert!(resumed.items.contains(&"t1".into()).await.unwrap());
        let users = resumed.users.snapshot().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, EntityId::from("u2"));
        assert_eq!(users[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_restore_skips_queued_ids_already_stored() {
        let checkpoint = Checkpoint {
            user_queue: vec![QueueEntry::new("u1".into())],
            user_records: vec![UserRecord::from_parts(
                "u1".into(),
                Attributes::new(),
                Vec::new(),
                Vec::new(),
            )],
            ..Default::default()
        };

        let frontier = Frontier::in_memory();
        checkpoint.restore_into(&frontier).await.unwrap();

        assert!(frontier.users.is_empty().await.unwrap());
        assert_eq!(frontier.user_records.len().await.unwrap(), 1);
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_checkpoint(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.checkpoint");
        fs::write(&path, b"not msgpack").unwrap();
        assert!(matches!(load_checkpoint(&path), Err(CrawlError::Checkpoint(_))));
    }
}
