//! Startup configuration.
//!
//! Values come from an optional config file, overridden by `TAUTH_*`
//! environment variables (`TAUTH_MONGODB_URI`, `TAUTH_MONGODB_DBNAME`, ...).
//! Loading never fails on missing values; [`Config::validate`] does, so the
//! entry point can exit before anything is connected or registered.

use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of every environment variable the bridge reads.
pub const ENV_PREFIX: &str = "TAUTH";

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// MongoDB connection string, credentials included
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    /// Database every query runs against
    #[serde(default)]
    pub mongodb_dbname: Option<String>,
    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Connect and server-selection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-query deadline in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Largest result set a query may return
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

fn default_app_name() -> String {
    crate::NAME.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_max_documents() -> usize {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongodb_uri: None,
            mongodb_dbname: None,
            app_name: default_app_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            max_documents: default_max_documents(),
        }
    }
}

/// Settings the connection manager needs.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Connection string
    pub uri: String,
    /// Database name
    pub database: String,
    /// Application name reported to the server
    pub app_name: String,
    /// Connect timeout
    pub connect_timeout: Duration,
}

/// Bounds applied to every query the bridge runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Deadline for one query
    pub timeout: Duration,
    /// Largest accepted result set
    pub max_documents: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(default_query_timeout_ms()),
            max_documents: default_max_documents(),
        }
    }
}

impl Config {
    /// Load configuration from the environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load configuration from an optional file, then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX));
        Self::build(builder)
    }

    /// Load configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml));
        Self::build(builder)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::config(format!("failed to load configuration: {}", e)))
    }

    /// Validate the configuration.
    ///
    /// Both store values are required; every limit must be positive.
    pub fn validate(&self) -> Result<()> {
        required(&self.mongodb_uri, "mongodb_uri")?;
        required(&self.mongodb_dbname, "mongodb_dbname")?;

        for (key, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("query_timeout_ms", self.query_timeout_ms),
            ("max_documents", self.max_documents as u64),
        ] {
            if value == 0 {
                return Err(Error::config_key(format!("{} must be positive", key), key));
            }
        }
        Ok(())
    }

    /// Connection settings. Fails like [`Config::validate`] when a
    /// required value is missing.
    pub fn store(&self) -> Result<StoreSettings> {
        Ok(StoreSettings {
            uri: required(&self.mongodb_uri, "mongodb_uri")?.to_string(),
            database: required(&self.mongodb_dbname, "mongodb_dbname")?.to_string(),
            app_name: self.app_name.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        })
    }

    /// Query bounds.
    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            timeout: Duration::from_millis(self.query_timeout_ms),
            max_documents: self.max_documents,
        }
    }
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::config_key(
            format!(
                "missing required setting {} (env {}_{})",
                key,
                ENV_PREFIX,
                key.to_uppercase()
            ),
            key,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.query_timeout_ms, 5_000);
        assert_eq!(config.max_documents, 1_000);
        assert_eq!(config.app_name, "rego-mongo-bridge");
        assert!(config.mongodb_uri.is_none());
    }

    #[test]
    fn test_missing_store_values_fail_validation() {
        let config = Config {
            mongodb_uri: Some("mongodb://localhost:27017".into()),
            ..Config::default()
        };
        match config.validate().unwrap_err() {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("mongodb_dbname"));
                assert!(message.contains("TAUTH_MONGODB_DBNAME"), "{}", message);
            }
            other => panic!("unexpected error: {}", other),
        }

        let config = Config {
            mongodb_uri: Some("   ".into()),
            mongodb_dbname: Some("tauth".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
        assert!(config.store().is_err());
    }

    #[test]
    fn test_yaml_overrides() {
        let config = Config::from_yaml_str(
            "mongodb_uri: mongodb://db:27017\nmongodb_dbname: tauth\nquery_timeout_ms: 250\nmax_documents: 10\n",
        )
        .unwrap();
        config.validate().unwrap();

        let store = config.store().unwrap();
        assert_eq!(store.uri, "mongodb://db:27017");
        assert_eq!(store.database, "tauth");

        let limits = config.query_limits();
        assert_eq!(limits.timeout, Duration::from_millis(250));
        assert_eq!(limits.max_documents, 10);
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let config = Config {
            mongodb_uri: Some("mongodb://localhost".into()),
            mongodb_dbname: Some("tauth".into()),
            max_documents: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "max_documents"));
    }
}
