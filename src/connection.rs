//! Connection manager.
//!
//! Owns the single store connection for the life of the process. The
//! connection is established once, proven alive with a ping, and then only
//! ever handed out by shared reference.

use crate::config::StoreSettings;
use crate::store::{DocumentStore, MongoStore};
use crate::{Error, Result};

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

/// A validated store connection bound to one database.
pub struct Connection {
    store: Arc<dyn DocumentStore>,
    database: String,
}

impl Connection {
    /// The store client.
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// The database every query runs against.
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// Holds the process-wide connection.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connection: OnceLock<Connection>,
}

impl ConnectionManager {
    /// Create a manager with no connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to MongoDB and verify the connection with a ping.
    pub async fn initialize(&self, settings: &StoreSettings) -> Result<&Connection> {
        require("mongodb_uri", &settings.uri)?;
        require("mongodb_dbname", &settings.database)?;
        self.ensure_uninitialized()?;

        let store = MongoStore::connect(&settings.uri, &settings.app_name, settings.connect_timeout)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create MongoDB client");
                Error::connection("failed to create store client", Some(e))
            })?;

        self.initialize_with(Arc::new(store), &settings.database).await
    }

    /// Verify `store` with a ping and install it as the process connection.
    pub async fn initialize_with(
        &self,
        store: Arc<dyn DocumentStore>,
        database: &str,
    ) -> Result<&Connection> {
        require("mongodb_dbname", database)?;
        self.ensure_uninitialized()?;

        store.ping(database).await.map_err(|e| {
            error!(database, error = %e, "Store liveness probe failed");
            Error::connection(format!("liveness probe against `{}` failed", database), Some(e))
        })?;

        let connection = Connection {
            store,
            database: database.to_string(),
        };
        if self.connection.set(connection).is_err() {
            return Err(already_initialized());
        }

        info!(database, "Store connection established");
        self.connection.get().ok_or_else(|| Error::internal("connection vanished after set"))
    }

    /// The connection, if initialization has completed.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.get()
    }

    /// Check if initialization has completed.
    pub fn is_initialized(&self) -> bool {
        self.connection.get().is_some()
    }

    fn ensure_uninitialized(&self) -> Result<()> {
        if self.is_initialized() {
            return Err(already_initialized());
        }
        Ok(())
    }
}

fn already_initialized() -> Error {
    Error::connection("connection manager is already initialized", None)
}

fn require(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config_key(format!("{} must not be empty", key), key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_initialize_with_live_store() {
        let manager = ConnectionManager::new();
        assert!(!manager.is_initialized());

        let connection = manager
            .initialize_with(Arc::new(InMemoryStore::new()), "tauth")
            .await
            .unwrap();
        assert_eq!(connection.database(), "tauth");
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_ping_is_connection_error() {
        let manager = ConnectionManager::new();
        let store = InMemoryStore::new().with_ping_failure("not authorized");

        let err = manager
            .initialize_with(Arc::new(store), "tauth")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { source: Some(_), .. }));
        assert!(err.is_fatal());
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_second_initialization_is_rejected() {
        let manager = ConnectionManager::new();
        manager
            .initialize_with(Arc::new(InMemoryStore::new()), "tauth")
            .await
            .unwrap();

        let err = manager
            .initialize_with(Arc::new(InMemoryStore::new()), "other")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(manager.connection().unwrap().database(), "tauth");
    }

    #[tokio::test]
    async fn test_empty_settings_are_config_errors() {
        let manager = ConnectionManager::new();
        let settings = StoreSettings {
            uri: String::new(),
            database: "tauth".into(),
            app_name: "test".into(),
            connect_timeout: std::time::Duration::from_secs(1),
        };
        let err = manager.initialize(&settings).await.unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "mongodb_uri"));

        let err = manager
            .initialize_with(Arc::new(InMemoryStore::new()), " ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_connection_error() {
        let manager = ConnectionManager::new();
        let settings = StoreSettings {
            uri: "not-a-connection-string".into(),
            database: "tauth".into(),
            app_name: "test".into(),
            connect_timeout: std::time::Duration::from_secs(1),
        };
        let err = manager.initialize(&settings).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }
}
