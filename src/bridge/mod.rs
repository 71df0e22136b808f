//! The `mongodb.query` function.
//!
//! Runs a find against the process connection and returns every matching
//! document. The bridge is read-only, never retries, and never sorts:
//! result order is whatever the store returns.

use crate::config::QueryLimits;
use crate::connection::ConnectionManager;
use crate::host::{CallContext, EvaluationSignal, ExternalFunction};
use crate::registration::{FunctionRegistration, MONGODB_QUERY};
use crate::store::FindLimits;
use crate::telemetry::Telemetry;
use crate::value::{document, Mapping, NativeValue, ResultSet};
use crate::{Error, QueryErrorKind, Result};

use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info_span, Instrument};

/// Query bridge between policy evaluation and the document store.
pub struct QueryBridge {
    connections: Arc<ConnectionManager>,
    runtime: Handle,
    limits: QueryLimits,
    telemetry: Arc<Telemetry>,
}

impl QueryBridge {
    /// Create a bridge.
    ///
    /// Calls from policy code block the evaluating thread on `runtime`.
    /// Evaluating from a plain thread or from a multi-thread tokio runtime
    /// works; from a current-thread runtime every call fails.
    pub fn new(
        connections: Arc<ConnectionManager>,
        runtime: Handle,
        limits: QueryLimits,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            connections,
            runtime,
            limits,
            telemetry,
        }
    }

    /// Find every document of `collection` matching `filter`.
    ///
    /// `collection` must be non-empty and must not contain `$` or a NUL
    /// character, which MongoDB does not allow in collection names; such
    /// names fail as a type error on argument 1 without reaching the store.
    pub async fn query(
        &self,
        collection: &str,
        filter: &Mapping,
        signal: &EvaluationSignal,
    ) -> Result<ResultSet> {
        let connection = self.connections.connection().ok_or_else(|| {
            Error::query(
                QueryErrorKind::NotInitialized,
                "connection manager has not been initialized",
            )
        })?;
        validate_collection(collection)?;

        if signal.is_cancelled() {
            return Err(Error::query(
                QueryErrorKind::Cancelled,
                "evaluation was canceled before the query started",
            ));
        }

        let find_limits = FindLimits {
            max_documents: self.limits.max_documents.saturating_add(1),
            max_time: self.limits.timeout,
        };
        let span = info_span!(
            "mongodb.query",
            database = connection.database(),
            collection
        );

        let started = Instant::now();
        let find = connection.store().find(
            connection.database(),
            collection,
            document::to_filter(filter),
            &find_limits,
        );
        let outcome = tokio::select! {
            biased;
            _ = signal.cancelled() => Err(Error::query(
                QueryErrorKind::Cancelled,
                "evaluation was canceled while the query was running",
            )),
            found = tokio::time::timeout(self.limits.timeout, find).instrument(span) => match found {
                Ok(Ok(documents)) => Ok(documents),
                Ok(Err(e)) => Err(Error::store_failure(
                    format!("find on `{}` failed", collection),
                    e,
                )),
                Err(_) => Err(Error::query(
                    QueryErrorKind::DeadlineExceeded,
                    format!(
                        "find on `{}` exceeded {}ms",
                        collection,
                        self.limits.timeout.as_millis()
                    ),
                )),
            },
        };
        let elapsed = started.elapsed();

        let documents = match outcome {
            Ok(documents) => documents,
            Err(err) => {
                self.telemetry.record_query(elapsed, None);
                return Err(err);
            }
        };
        self.telemetry.record_query(elapsed, Some(documents.len()));
        debug!(
            collection,
            documents = documents.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Query completed"
        );

        if documents.len() > self.limits.max_documents {
            return Err(Error::query(
                QueryErrorKind::ResultTooLarge,
                format!(
                    "find on `{}` matched more than {} documents",
                    collection, self.limits.max_documents
                ),
            ));
        }

        document::from_documents(&documents)
    }
}

/// Reject names the store could never resolve before doing any I/O.
fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() {
        return Err(Error::argument(1, "collection name must not be empty"));
    }
    if collection.contains('\0') || collection.contains('$') {
        return Err(Error::argument(
            1,
            format!("invalid collection name {:?}", collection),
        ));
    }
    Ok(())
}

impl ExternalFunction for QueryBridge {
    fn registration(&self) -> &FunctionRegistration {
        &MONGODB_QUERY
    }

    fn call(&self, context: &CallContext, args: Vec<NativeValue>) -> Result<NativeValue> {
        let [collection, filter]: [NativeValue; 2] = args
            .try_into()
            .map_err(|args: Vec<NativeValue>| {
                Error::type_error(format!("expected 2 arguments, got {}", args.len()))
            })?;
        let collection = collection
            .as_str()
            .ok_or_else(|| Error::argument(1, format!("expected string, got {}", collection.kind())))?;
        let filter = filter
            .as_mapping()
            .ok_or_else(|| Error::argument(2, format!("expected object, got {}", filter.kind())))?;

        let query = self.query(collection, filter, &context.signal);
        let results = match Handle::try_current().map(|current| current.runtime_flavor()) {
            Ok(RuntimeFlavor::CurrentThread) => {
                return Err(Error::internal(
                    "cannot block a current-thread tokio runtime; evaluate policies \
                     from a plain thread or a multi-thread runtime",
                ))
            }
            Ok(_) => tokio::task::block_in_place(|| self.runtime.block_on(query)),
            Err(_) => self.runtime.block_on(query),
        }?;

        Ok(NativeValue::Sequence(
            results.into_iter().map(NativeValue::Mapping).collect(),
        ))
    }
}
