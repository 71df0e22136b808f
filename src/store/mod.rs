//! Document store clients.
//!
//! The bridge talks to the store only through [`DocumentStore`], which
//! exposes a liveness probe and a read-only find. Implementations must be
//! safe for concurrent use: one instance is shared by every evaluation.

mod memory;
mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use bson::Document;
use std::time::Duration;
use thiserror::Error;

/// Boxed error from a store driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A failure reported by a store client.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct StoreError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl StoreError {
    /// Create a store error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a driver error.
    pub fn from_driver(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Bounds applied to one find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindLimits {
    /// Maximum number of documents to return
    pub max_documents: usize,
    /// Server-side execution budget
    pub max_time: Duration,
}

/// A read-only document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Round-trip to the store to prove the connection is alive.
    async fn ping(&self, database: &str) -> Result<(), StoreError>;

    /// Return the documents of `database.collection` matching `filter`.
    ///
    /// No sort is applied; callers must not rely on result order.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        limits: &FindLimits,
    ) -> Result<Vec<Document>, StoreError>;
}
