//! In-memory store for tests and local policy development.

use super::{DocumentStore, FindLimits, StoreError};

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A [`DocumentStore`] holding documents in memory.
///
/// Filters match on top-level field equality only; operator documents
/// such as `{"$gte": 18}` never match. Find calls are counted so tests can
/// observe how often the bridge reached the store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    find_calls: AtomicUsize,
    ping_failure: Mutex<Option<String>>,
    find_failure: Mutex<Option<String>>,
    find_delay: Mutex<Option<Duration>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `database.collection` with documents.
    pub fn with_documents(self, database: &str, collection: &str, documents: Vec<Document>) -> Self {
        self.insert(database, collection, documents);
        self
    }

    /// Make every ping fail with `message`.
    pub fn with_ping_failure(self, message: impl Into<String>) -> Self {
        *self.ping_failure.lock() = Some(message.into());
        self
    }

    /// Make every find fail with `message`.
    pub fn with_find_failure(self, message: impl Into<String>) -> Self {
        *self.find_failure.lock() = Some(message.into());
        self
    }

    /// Delay every find by `delay`.
    pub fn with_find_delay(self, delay: Duration) -> Self {
        *self.find_delay.lock() = Some(delay);
        self
    }

    /// Append documents to `database.collection`.
    pub fn insert(&self, database: &str, collection: &str, documents: Vec<Document>) {
        self.collections
            .lock()
            .entry(namespace(database, collection))
            .or_default()
            .extend(documents);
    }

    /// Number of finds issued so far.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key).map_or(false, |actual| same_value(actual, expected)))
}

fn same_value(actual: &Bson, expected: &Bson) -> bool {
    match (actual, expected) {
        (Bson::Int32(a), Bson::Int64(e)) | (Bson::Int64(e), Bson::Int32(a)) => i64::from(*a) == *e,
        _ => actual == expected,
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self, _database: &str) -> Result<(), StoreError> {
        match self.ping_failure.lock().clone() {
            Some(message) => Err(StoreError::new(message)),
            None => Ok(()),
        }
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        limits: &FindLimits,
    ) -> Result<Vec<Document>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.find_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.find_failure.lock().clone() {
            return Err(StoreError::new(message));
        }

        let collections = self.collections.lock();
        let found = collections
            .get(&namespace(database, collection))
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, &filter))
                    .take(limits.max_documents)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }
}
