//! MongoDB store client.

use super::{DocumentStore, FindLimits, StoreError};

use async_trait::async_trait;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::Client;
use std::time::Duration;
use tracing::debug;

/// A [`DocumentStore`] backed by the official MongoDB driver.
///
/// `mongodb::Client` pools connections internally and is documented as
/// safe to share across threads and tasks.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Create a client for `endpoint` (a `mongodb://` or `mongodb+srv://`
    /// connection string, credentials included).
    ///
    /// This resolves options only; call [`DocumentStore::ping`] to prove
    /// the server is reachable.
    pub async fn connect(
        endpoint: &str,
        app_name: &str,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(endpoint)
            .await
            .map_err(StoreError::from_driver)?;
        options.app_name = Some(app_name.to_string());
        options.connect_timeout = Some(connect_timeout);
        options.server_selection_timeout = Some(connect_timeout);

        let client = Client::with_options(options).map_err(StoreError::from_driver)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self, database: &str) -> Result<(), StoreError> {
        self.client
            .database(database)
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(StoreError::from_driver)?;
        debug!(database, "MongoDB ping succeeded");
        Ok(())
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        limits: &FindLimits,
    ) -> Result<Vec<Document>, StoreError> {
        let mut options = FindOptions::default();
        options.limit = Some(i64::try_from(limits.max_documents).unwrap_or(i64::MAX));
        options.max_time = Some(limits.max_time);

        let cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .find(filter, options)
            .await
            .map_err(StoreError::from_driver)?;

        cursor.try_collect().await.map_err(StoreError::from_driver)
    }
}
