//! # Rego MongoDB Bridge
//!
//! Lets Rego policies read from MongoDB while they are being evaluated.
//! Policy code calls `mongodb.query(collection, filter)` and gets back every
//! matching document as an array of objects.
//!
//! ## Features
//!
//! - **Connection Manager**: One process-wide connection, verified with a ping at startup
//! - **Value Marshaling**: Policy terms to query filters and documents back to terms
//! - **Query Bridge**: Bounded, cancelable, read-only finds
//! - **Registration**: Memoized within an evaluation, so a policy sees one snapshot
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rego_mongo_bridge::{
//!     Config, ConnectionManager, EvaluationSignal, PolicyHost, QueryBridge, Telemetry,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let connections = Arc::new(ConnectionManager::new());
//!     runtime.block_on(connections.initialize(&config.store()?))?;
//!
//!     let telemetry = Arc::new(Telemetry::new());
//!     let bridge = QueryBridge::new(
//!         connections,
//!         runtime.handle().clone(),
//!         config.query_limits(),
//!         telemetry.clone(),
//!     );
//!
//!     let mut host = PolicyHost::new(telemetry);
//!     host.register(Arc::new(bridge))?;
//!     host.add_policy(
//!         "authz.rego",
//!         r#"package authz
//! import rego.v1
//! admins := mongodb.query("users", {"role": "admin"})"#,
//!     )?;
//!
//!     let admins = host.evaluate_value("data.authz.admins", &EvaluationSignal::new())?;
//!     println!("{:?}", admins);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod host;
pub mod registration;
pub mod store;
pub mod telemetry;
pub mod value;

// Re-export main types for convenience
pub use bridge::QueryBridge;
pub use config::{Config, QueryLimits, StoreSettings};
pub use connection::{Connection, ConnectionManager};
pub use error::{Error, QueryErrorKind, Result};
pub use host::{CallContext, EvaluationSignal, ExternalFunction, PolicyHost};
pub use registration::{Determinism, FunctionRegistration, TermType, MONGODB_QUERY};
pub use store::{DocumentStore, StoreError};
pub use telemetry::{Telemetry, TelemetryMetrics};
pub use value::{Mapping, NativeValue, ResultSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
