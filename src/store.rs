//! The persistent store boundary: treated as a transactional store, with
//! only the interface in scope. `MemoryStore` is the reference
//! implementation used by tests and as the default runtime backend absent a
//! real database, grounded in the teacher's `connectors/core.rs` trait
//! shape and built on the teacher's `dashmap`/`parking_lot` dependencies.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

/// A row identified by a string key within a named collection (table).
pub type Row = serde_json::Value;

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Insert only if no row with this key exists in this collection.
    /// MUST be race-free. Returns `true` if inserted.
    async fn insert_if_absent(&self, collection: &str, key: &str, row: Row) -> CoreResult<bool>;

    /// Insert or replace.
    async fn upsert(&self, collection: &str, key: &str, row: Row) -> CoreResult<()>;

    async fn get_by_id(&self, collection: &str, key: &str) -> CoreResult<Option<Row>>;

    /// Query rows in `collection` whose `field` equals `value`.
    async fn query_by_index(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> CoreResult<Vec<Row>>;

    async fn delete(&self, collection: &str, key: &str) -> CoreResult<()>;

    /// Run a closure against a transactional view; all writes the closure
    /// performs commit atomically, or none do if it returns an error.
    async fn transaction(
        &self,
        f: Box<dyn FnOnce(&dyn TransactionalStore) -> CoreResult<()> + Send>,
    ) -> CoreResult<()>;

    /// Stream every row of a collection, for housekeeping/replay passes.
    async fn fetch_stream(&self, collection: &str) -> CoreResult<Vec<Row>>;
}

/// Typed convenience helpers layered over the raw `Row` operations. Kept as
/// an extension trait so `TransactionalStore` itself stays object-safe.
#[async_trait]
pub trait TypedStoreExt: TransactionalStore {
    async fn put<T: Serialize + Send + Sync>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> CoreResult<()> {
        let row = serde_json::to_value(value)?;
        self.upsert(collection, key, row).await
    }

    async fn put_if_absent<T: Serialize + Send + Sync>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> CoreResult<bool> {
        let row = serde_json::to_value(value)?;
        self.insert_if_absent(collection, key, row).await
    }

    async fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> CoreResult<Option<T>> {
        match self.get_by_id(collection, key).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn list<T: DeserializeOwned>(&self, collection: &str) -> CoreResult<Vec<T>> {
        let rows = self.fetch_stream(collection).await?;
        rows.into_iter()
            .map(|r| serde_json::from_value(r).map_err(CoreError::from))
            .collect()
    }
}

impl<T: TransactionalStore + ?Sized> TypedStoreExt for T {}

/// In-memory reference implementation: one `DashMap<String, Row>` per
/// collection, guarded collection creation behind a `Mutex` over the
/// outer map of collections.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Arc<DashMap<String, Row>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<DashMap<String, Row>> {
        let mut collections = self.collections.lock();
        collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn insert_if_absent(&self, collection: &str, key: &str, row: Row) -> CoreResult<bool> {
        let coll = self.collection(collection);
        // `entry` holds the shard lock for the whole check-then-act, making
        // this race-free.
        match coll.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(row);
                Ok(true)
            }
        }
    }

    async fn upsert(&self, collection: &str, key: &str, row: Row) -> CoreResult<()> {
        self.collection(collection).insert(key.to_string(), row);
        Ok(())
    }

    async fn get_by_id(&self, collection: &str, key: &str) -> CoreResult<Option<Row>> {
        Ok(self.collection(collection).get(key).map(|r| r.clone()))
    }

    async fn query_by_index(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> CoreResult<Vec<Row>> {
        let coll = self.collection(collection);
        Ok(coll
            .iter()
            .filter(|entry| entry.value().get(field) == Some(value))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete(&self, collection: &str, key: &str) -> CoreResult<()> {
        self.collection(collection).remove(key);
        Ok(())
    }

    async fn transaction(
        &self,
        f: Box<dyn FnOnce(&dyn TransactionalStore) -> CoreResult<()> + Send>,
    ) -> CoreResult<()> {
        // The in-memory store applies every write immediately and
        // per-collection atomically; since there is no real multi-row
        // rollback here, the closure's writes simply run against `self`.
        // A real backend would wrap this in a DB transaction.
        f(self)
    }

    async fn fetch_stream(&self, collection: &str) -> CoreResult<Vec<Row>> {
        let coll = self.collection(collection);
        Ok(coll.iter().map(|e| e.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_if_absent_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store
            .insert_if_absent("docs", "k1", serde_json::json!({"a":1}))
            .await
            .unwrap());
        assert!(!store
            .insert_if_absent("docs", "k1", serde_json::json!({"a":2}))
            .await
            .unwrap());
        let got = store.get_by_id("docs", "k1").await.unwrap().unwrap();
        assert_eq!(got["a"], 1);
    }

    #[tokio::test]
    async fn query_by_index_filters() {
        let store = MemoryStore::new();
        store
            .upsert("docs", "a", serde_json::json!({"source": "s1"}))
            .await
            .unwrap();
        store
            .upsert("docs", "b", serde_json::json!({"source": "s2"}))
            .await
            .unwrap();
        let matches = store
            .query_by_index("docs", "source", &serde_json::json!("s1"))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
    }
}
