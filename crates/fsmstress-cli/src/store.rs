//! In-memory document store used as the bundled stress target.
//!
//! Collections of JSON documents keyed by integer id. Every operation takes
//! the store lock once, so each call is atomic with respect to the others;
//! anything spanning two calls is not.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection not found: {collection}")]
    NoSuchCollection { collection: String },

    #[error("collection already exists: {collection}")]
    CollectionExists { collection: String },

    #[error("duplicate key {id} in collection {collection}")]
    DuplicateKey { collection: String, id: i64 },

    #[error("document {id} in collection {collection} is not an object")]
    NotAnObject { collection: String, id: i64 },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

type Collection = BTreeMap<i64, Value>;

#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    operations: AtomicU64,
}

fn missing(collection: &str) -> StoreError {
    StoreError::NoSuchCollection {
        collection: collection.to_string(),
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total calls served, successful or not.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn create_collection(&self, collection: &str) -> StoreResult<()> {
        self.tick();
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection) {
            return Err(StoreError::CollectionExists {
                collection: collection.to_string(),
            });
        }
        collections.insert(collection.to_string(), Collection::new());
        Ok(())
    }

    /// Returns whether the collection existed.
    pub async fn drop_collection(&self, collection: &str) -> bool {
        self.tick();
        self.collections.write().await.remove(collection).is_some()
    }

    pub async fn collection_names(&self) -> Vec<String> {
        self.tick();
        self.collections.read().await.keys().cloned().collect()
    }

    pub async fn insert(&self, collection: &str, id: i64, doc: Value) -> StoreResult<()> {
        self.tick();
        if !doc.is_object() {
            return Err(StoreError::NotAnObject {
                collection: collection.to_string(),
                id,
            });
        }
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        if docs.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        docs.insert(id, doc);
        Ok(())
    }

    pub async fn find(&self, collection: &str, id: i64) -> StoreResult<Option<Value>> {
        self.tick();
        let collections = self.collections.read().await;
        let docs = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(docs.get(&id).cloned())
    }

    /// Add `by` to an integer field (missing counts as zero) and return the
    /// new value, or `None` when the document does not exist.
    pub async fn increment(
        &self,
        collection: &str,
        id: i64,
        field: &str,
        by: i64,
    ) -> StoreResult<Option<i64>> {
        self.tick();
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        let Some(doc) = docs.get_mut(&id) else {
            return Ok(None);
        };
        let fields = doc.as_object_mut().ok_or_else(|| StoreError::NotAnObject {
            collection: collection.to_string(),
            id,
        })?;
        let next = fields.get(field).and_then(Value::as_i64).unwrap_or(0) + by;
        fields.insert(field.to_string(), Value::from(next));
        Ok(Some(next))
    }

    /// Returns whether a document was removed.
    pub async fn remove(&self, collection: &str, id: i64) -> StoreResult<bool> {
        self.tick();
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        Ok(docs.remove(&id).is_some())
    }

    pub async fn count(&self, collection: &str) -> StoreResult<usize> {
        self.tick();
        let collections = self.collections.read().await;
        let docs = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_find_remove() {
        let store = DocumentStore::new();
        store.create_collection("docs").await.unwrap();
        store.insert("docs", 1, json!({"a": 1})).await.unwrap();

        assert_eq!(store.find("docs", 1).await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.count("docs").await.unwrap(), 1);
        assert!(store.remove("docs", 1).await.unwrap());
        assert!(!store.remove("docs", 1).await.unwrap());
        assert_eq!(store.count("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_and_missing_collection() {
        let store = DocumentStore::new();
        store.create_collection("docs").await.unwrap();
        store.insert("docs", 7, json!({})).await.unwrap();

        assert!(matches!(
            store.insert("docs", 7, json!({})).await,
            Err(StoreError::DuplicateKey { id: 7, .. })
        ));
        assert!(matches!(
            store.count("nope").await,
            Err(StoreError::NoSuchCollection { .. })
        ));
        assert!(matches!(
            store.create_collection("docs").await,
            Err(StoreError::CollectionExists { .. })
        ));
        assert!(matches!(
            store.insert("docs", 8, json!(3)).await,
            Err(StoreError::NotAnObject { .. })
        ));
    }

    #[tokio::test]
    async fn test_increment_creates_field() {
        let store = DocumentStore::new();
        store.create_collection("c").await.unwrap();
        store.insert("c", 0, json!({})).await.unwrap();

        assert_eq!(store.increment("c", 0, "hits", 2).await.unwrap(), Some(2));
        assert_eq!(store.increment("c", 0, "hits", 3).await.unwrap(), Some(5));
        assert_eq!(store.increment("c", 9, "hits", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drop_collection() {
        let store = DocumentStore::new();
        store.create_collection("c").await.unwrap();
        assert_eq!(store.collection_names().await, vec!["c".to_string()]);
        assert!(store.drop_collection("c").await);
        assert!(!store.drop_collection("c").await);
        assert_eq!(store.operations(), 4);
    }
}
