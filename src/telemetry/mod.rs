//! Bridge telemetry.
//!
//! Lock-free counters for store queries, memo hits, and failed
//! calls. The store-query counter is what shows memoization at work: two
//! identical calls in one evaluation must move it by one.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by the query bridge and the policy host.
#[derive(Debug, Default)]
pub struct Telemetry {
    store_queries: AtomicU64,
    store_failures: AtomicU64,
    documents_returned: AtomicU64,
    memo_hits: AtomicU64,
    evaluations: AtomicU64,
    call_failures: DashMap<&'static str, u64>,
    total_query_time_us: AtomicU64,
}

impl Telemetry {
    /// Create a new telemetry instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a query that reached the store.
    pub fn record_query(&self, duration: Duration, documents: Option<usize>) {
        self.store_queries.fetch_add(1, Ordering::Relaxed);
        match documents {
            Some(count) => {
                self.documents_returned
                    .fetch_add(count as u64, Ordering::Relaxed);
            }
            None => {
                self.store_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a call answered from the per-evaluation memo.
    pub fn record_memo_hit(&self) {
        self.memo_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed or failed evaluation.
    pub fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed external call.
    pub fn record_call_failure(&self, category: &'static str) {
        *self.call_failures.entry(category).or_insert(0) += 1;
    }

    /// Number of queries that reached the store.
    pub fn store_queries(&self) -> u64 {
        self.store_queries.load(Ordering::Relaxed)
    }

    /// Get current metrics.
    pub fn metrics(&self) -> TelemetryMetrics {
        let store_queries = self.store_queries();
        let total_time_us = self.total_query_time_us.load(Ordering::Relaxed);
        let avg_query_time_ms = if store_queries > 0 {
            (total_time_us as f64 / store_queries as f64) / 1000.0
        } else {
            0.0
        };

        TelemetryMetrics {
            store_queries,
            store_failures: self.store_failures.load(Ordering::Relaxed),
            documents_returned: self.documents_returned.load(Ordering::Relaxed),
            memo_hits: self.memo_hits.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            call_failures: self
                .call_failures
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            avg_query_time_ms,
        }
    }
}

/// Snapshot of the bridge counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    /// Queries that reached the store
    pub store_queries: u64,
    /// Queries the store failed
    pub store_failures: u64,
    /// Documents returned by successful queries
    pub documents_returned: u64,
    /// Calls answered from the per-evaluation memo
    pub memo_hits: u64,
    /// Evaluations run by the policy host
    pub evaluations: u64,
    /// Failed calls by error category
    pub call_failures: BTreeMap<String, u64>,
    /// Average store query time in milliseconds
    pub avg_query_time_ms: f64,
}
