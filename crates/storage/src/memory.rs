use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::document::{
    Direction, DocumentStore, Fields, Filter, OrderBy, Patch, StoredDocument, compare_values,
};
use crate::repository::StorageError;

type Collections = HashMap<String, BTreeMap<String, Fields>>;

/// In-process document store for tests and local runs.
///
/// Clones share the same data. `set_offline(true)` makes every call fail with
/// a connection error, standing in for a dropped network.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Number of documents currently held in `collection`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store is offline.
    pub fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let guard = self.lock()?;
        Ok(guard.get(collection).map_or(0, BTreeMap::len))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StorageError> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::Connection("store offline".into()));
        }
        self.collections
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn matches_all(fields: &Fields, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        // A missing field reads as null.
        let value = fields.get(&filter.field).unwrap_or(&Value::Null);
        let ordering = compare_values(value, &filter.value);
        filter.op.holds(ordering)
    })
}

fn order_documents(docs: &mut [StoredDocument], order: &OrderBy) {
    docs.sort_by(|a, b| {
        match (a.fields.get(&order.field), b.fields.get(&order.field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y).unwrap_or(Ordering::Equal);
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            }
        }
    });
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<StoredDocument>, StorageError> {
        let guard = self.lock()?;
        let Some(docs) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<StoredDocument> = docs
            .iter()
            .filter(|(_, fields)| matches_all(fields, filters))
            .map(|(id, fields)| StoredDocument {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();
        if let Some(order) = order_by {
            order_documents(&mut found, order);
        }
        Ok(found)
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredDocument>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| StoredDocument {
                id: id.to_owned(),
                fields: fields.clone(),
            }))
    }

    async fn insert(&self, collection: &str, fields: Fields) -> Result<String, StorageError> {
        let mut guard = self.lock()?;
        let id = Uuid::new_v4().to_string();
        guard
            .entry(collection.to_owned())
            .or_default()
            .insert(id.clone(), fields);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let doc = guard
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or(StorageError::NotFound)?;

        // Stage on a copy so a failing path leaves the document unchanged.
        let mut staged = doc.clone();
        patch.apply(&mut staged)?;
        *doc = staged;
        Ok(())
    }
}
