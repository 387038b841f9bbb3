//! # Record Module
//!
//! Typed records for the two node kinds of the favorites graph.
//!
//! The content service hands back a loosely typed attribute bag for every
//! entity. Records are built from that bag at ingestion time: well-known
//! fields are lifted into named optional fields, required fields are checked
//! (a missing one yields `CrawlError::MissingField` and nothing is persisted),
//! and the raw bag is kept alongside for anything not modelled explicitly.

use crate::client::Fetcher;
use crate::error::CrawlError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Raw attribute bag as returned by the content service.
pub type Attributes = serde_json::Map<String, Value>;

/// Identifier of a user or an item. Numeric service ids are stringified.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads an id out of a JSON value, accepting numbers and strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(EntityId(s.clone())),
            Value::Number(n) => Some(EntityId(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        EntityId(n.to_string())
    }
}

/// The two node kinds of the bipartite graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Item,
}

impl EntityKind {
    pub fn opposite(self) -> Self {
        match self {
            EntityKind::User => EntityKind::Item,
            EntityKind::Item => EntityKind::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Item => "item",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by the record kinds that flow through the crawl.
#[async_trait]
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The kind of node this record describes.
    const KIND: EntityKind;

    /// The record kind found on the other side of this record's edges.
    type Neighbor: Record;

    fn id(&self) -> &EntityId;

    /// Ids of adjacent nodes of the opposite kind. Users keep favorites in
    /// the order the service listed them; items return favoriters sorted
    /// by id, without duplicates.
    fn neighbors(&self) -> Vec<EntityId>;

    /// Fetches and validates a full record through the rate-limited fetcher.
    async fn fetch(fetcher: &Fetcher, id: &EntityId) -> Result<Self, CrawlError>;
}

/// A fetched user, with its favorites and followers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: EntityId,
    pub username: Option<String>,
    pub permalink: Option<String>,
    pub full_name: Option<String>,
    pub followers_count: Option<u64>,
    pub followings_count: Option<u64>,
    pub track_count: Option<u64>,
    /// Favorited item ids, in the order the service returned them.
    pub favorites: Vec<EntityId>,
    pub followers: BTreeSet<EntityId>,
    pub attributes: Attributes,
}

impl UserRecord {
    /// Builds a user record from the service's attribute bag.
    pub fn from_parts(
        id: EntityId,
        attributes: Attributes,
        favorites: Vec<EntityId>,
        followers: impl IntoIterator<Item = EntityId>,
    ) -> Self {
        UserRecord {
            username: str_field(&attributes, "username"),
            permalink: str_field(&attributes, "permalink"),
            full_name: str_field(&attributes, "full_name"),
            followers_count: u64_field(&attributes, "followers_count"),
            followings_count: u64_field(&attributes, "followings_count"),
            track_count: u64_field(&attributes, "track_count"),
            id,
            favorites,
            followers: followers.into_iter().collect(),
            attributes,
        }
    }
}

#[async_trait]
impl Record for UserRecord {
    const KIND: EntityKind = EntityKind::User;
    type Neighbor = ItemRecord;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn neighbors(&self) -> Vec<EntityId> {
        self.favorites.clone()
    }

    async fn fetch(fetcher: &Fetcher, id: &EntityId) -> Result<Self, CrawlError> {
        fetcher.fetch_user(id).await
    }
}

/// A fetched content item, with the users who favorited it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: EntityId,
    /// The user who published the item (`user_id` on the service).
    pub owner_id: EntityId,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub duration_ms: Option<u64>,
    pub playback_count: Option<u64>,
    pub favoritings_count: Option<u64>,
    pub favoriters: BTreeSet<EntityId>,
    pub attributes: Attributes,
}

impl ItemRecord {
    /// Builds an item record from the service's attribute bag.
    ///
    /// Fails with `MissingField` when the owner id cannot be resolved.
    pub fn from_parts(
        id: EntityId,
        attributes: Attributes,
        favoriters: impl IntoIterator<Item = EntityId>,
    ) -> Result<Self, CrawlError> {
        let owner_id = attributes
            .get("user_id")
            .and_then(EntityId::from_value)
            .ok_or_else(|| CrawlError::MissingField {
                kind: EntityKind::Item,
                id: id.clone(),
                field: "user_id",
            })?;

        Ok(ItemRecord {
            owner_id,
            title: str_field(&attributes, "title"),
            genre: str_field(&attributes, "genre"),
            duration_ms: u64_field(&attributes, "duration"),
            playback_count: u64_field(&attributes, "playback_count"),
            favoritings_count: u64_field(&attributes, "favoritings_count"),
            id,
            favoriters: favoriters.into_iter().collect(),
            attributes,
        })
    }
}

#[async_trait]
impl Record for ItemRecord {
    const KIND: EntityKind = EntityKind::Item;
    type Neighbor = UserRecord;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn neighbors(&self) -> Vec<EntityId> {
        self.favoriters.iter().cloned().collect()
    }

    async fn fetch(fetcher: &Fetcher, id: &EntityId) -> Result<Self, CrawlError> {
        fetcher.fetch_item(id).await
    }
}

/// A frontier entry waiting to be fetched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntityId,
    /// Milliseconds since the Unix epoch at enqueue time.
    pub enqueued_at_ms: u64,
    /// Number of times this id has been requeued after a failed fetch.
    pub attempts: u32,
}

impl QueueEntry {
    pub fn new(id: EntityId) -> Self {
        QueueEntry {
            id,
            enqueued_at_ms: now_ms(),
            attempts: 0,
        }
    }

    /// Creates the entry that replaces this one after a failed attempt.
    pub fn retried(&self) -> Self {
        QueueEntry {
            id: self.id.clone(),
            enqueued_at_ms: now_ms(),
            attempts: self.attempts + 1,
        }
    }

    /// Time this entry spent in the queue, in milliseconds.
    pub fn wait_ms(&self) -> u64 {
        now_ms().saturating_sub(self.enqueued_at_ms)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn str_field(attributes: &Attributes, key: &str) -> Option<String> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn u64_field(attributes: &Attributes, key: &str) -> Option<u64> {
    attributes.get(key).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_user_record_lifts_known_fields() {
        let record = UserRecord::from_parts(
            "7".into(),
            attrs(json!({"id": 7, "username": "dj", "followers_count": 12, "extra": true})),
            vec!["t2".into(), "t1".into()],
            vec!["u9".into(), "u3".into(), "u9".into()],
        );

        assert_eq!(record.username.as_deref(), Some("dj"));
        assert_eq!(record.followers_count, Some(12));
        assert_eq!(record.full_name, None);
        assert_eq!(record.neighbors(), vec![EntityId::from("t2"), EntityId::from("t1")]);
        assert_eq!(record.followers.len(), 2);
        assert!(record.attributes.contains_key("extra"));
    }

    #[test]
    fn test_item_record_requires_owner() {
        let err = ItemRecord::from_parts("t1".into(), attrs(json!({"title": "x"})), Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CrawlError::MissingField { kind: EntityKind::Item, field: "user_id", .. }
        ));

        let null_owner =
            ItemRecord::from_parts("t1".into(), attrs(json!({"user_id": null})), Vec::new());
        assert!(null_owner.is_err());
    }

    #[test]
    fn test_item_record_accepts_numeric_owner() {
        let record = ItemRecord::from_parts(
            "t1".into(),
            attrs(json!({"user_id": 42, "duration": 180000, "genre": "ambient"})),
            vec!["u2".into(), "u1".into(), "u2".into()],
        )
        .unwrap();

        assert_eq!(record.owner_id, EntityId::from(42u64));
        assert_eq!(record.duration_ms, Some(180000));
        assert_eq!(record.genre.as_deref(), Some("ambient"));
        assert_eq!(record.neighbors(), vec![EntityId::from("u1"), EntityId::from("u2")]);
    }

    #[test]
    fn test_queue_entry_retry_increments_attempts() {
        let entry = QueueEntry::new("u1".into());
        let retried = entry.retried().retried();
        assert_eq!(retried.id, entry.id);
        assert_eq!(retried.attempts, 2);
    }

    #[test]
    fn test_entity_kind_opposite() {
        assert_eq!(EntityKind::User.opposite(), EntityKind::Item);
        assert_eq!(EntityKind::Item.opposite(), EntityKind::User);
        assert_eq!(EntityKind::Item.to_string(), "item");
    }
}
