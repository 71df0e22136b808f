//! Error types for the query bridge.
//!
//! Startup failures (`Config`, `Connection`) are fatal. Per-call failures
//! (`Type`, `Encoding`, `Query`) are returned to the policy engine as a
//! failed call and never replaced by a default value.

use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a query could not produce a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The connection manager has not completed initialization.
    NotInitialized,
    /// The store rejected or failed the query.
    StoreFailure,
    /// The query ran past its deadline.
    DeadlineExceeded,
    /// The enclosing evaluation was canceled.
    Cancelled,
    /// More documents matched than the configured maximum.
    ResultTooLarge,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryErrorKind::NotInitialized => "not_initialized",
            QueryErrorKind::StoreFailure => "store_failure",
            QueryErrorKind::DeadlineExceeded => "deadline_exceeded",
            QueryErrorKind::Cancelled => "cancelled",
            QueryErrorKind::ResultTooLarge => "result_too_large",
        };
        f.write_str(name)
    }
}

/// Main error type for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid startup configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },

    /// Connecting to, or probing, the document store failed
    #[error("Connection error: {message}")]
    Connection {
        /// Detailed error message
        message: String,
        /// Underlying store failure
        #[source]
        source: Option<StoreError>,
    },

    /// A function argument does not have the declared shape
    #[error("Type error: {message}")]
    Type {
        /// Expected vs. actual shape
        message: String,
        /// 1-based argument position, if the error concerns an argument
        position: Option<usize>,
    },

    /// A native value has no representation in the policy value model
    #[error("Encoding error at `{path}`: {message}")]
    Encoding {
        /// Detailed error message
        message: String,
        /// Dotted path of the offending field
        path: String,
    },

    /// Query execution failed
    #[error("Query error ({kind}): {message}")]
    Query {
        /// Failure class
        kind: QueryErrorKind,
        /// Detailed error message
        message: String,
        /// Underlying store failure
        #[source]
        source: Option<StoreError>,
    },

    /// A function could not be registered with the policy engine
    #[error("Registration error for `{function}`: {message}")]
    Registration {
        /// Function name
        function: String,
        /// Detailed error message
        message: String,
    },

    /// The policy engine failed to load or evaluate a policy
    #[error("Evaluation error: {message}")]
    Evaluation {
        /// Detailed error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected condition)
    #[error("Internal error: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error for a specific key.
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>, source: Option<StoreError>) -> Self {
        Error::Connection {
            message: message.into(),
            source,
        }
    }

    /// Create a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Type {
            message: message.into(),
            position: None,
        }
    }

    /// Create a type error for the argument at `position` (1-based).
    pub fn argument(position: usize, message: impl Into<String>) -> Self {
        Error::Type {
            message: format!("argument {}: {}", position, message.into()),
            position: Some(position),
        }
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>, path: impl Into<String>) -> Self {
        Error::Encoding {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Create a query error.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a store failure carrying the underlying cause.
    pub fn store_failure(message: impl Into<String>, source: StoreError) -> Self {
        Error::Query {
            kind: QueryErrorKind::StoreFailure,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a registration error.
    pub fn registration(function: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Registration {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::Evaluation {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// The query failure class, if this is a query error.
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Check if a caller may retry the operation.
    ///
    /// The bridge never retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Query {
                kind: QueryErrorKind::StoreFailure | QueryErrorKind::DeadlineExceeded,
                ..
            }
        )
    }

    /// Check if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Connection { .. })
    }

    /// Get the error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::Connection { .. } => "connection",
            Error::Type { .. } => "type",
            Error::Encoding { .. } => "encoding",
            Error::Query { .. } => "query",
            Error::Registration { .. } => "registration",
            Error::Evaluation { .. } => "evaluation",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Internal { .. } => "internal",
        }
    }
}
