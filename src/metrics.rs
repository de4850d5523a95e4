// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for dual-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `dual_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: account, appointment
//! - `operation`: upsert, get, delete, search, ping, connect
//! - `outcome`: created, updated, deleted, absent, skipped_*, failed

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::model::EntityKind;

/// Record the outcome of one service operation
pub fn record_outcome(kind: EntityKind, outcome: &str) {
    counter!(
        "dual_sync_outcomes_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record secondary-store operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "dual_sync_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set connection state (0 = Uninitialized, 1 = Connected, 2 = Disconnected, 3 = Closed)
pub fn set_connection_state(state: u8) {
    gauge!("dual_sync_connection_state").set(state as f64);
}

/// Record a physical connect attempt
pub fn record_connect_attempt(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("dual_sync_connect_attempts_total", "result" => result).increment(1);
}

/// Record a call through a circuit breaker
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "dual_sync_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one consistency report
pub fn record_verify_report(kind: EntityKind, report: &str) {
    counter!(
        "dual_sync_verify_reports_total",
        "kind" => kind.to_string(),
        "report" => report.to_string()
    )
    .increment(1);
}

/// Record a stored document that could not be decoded
pub fn record_corrupt_document(kind: EntityKind, operation: &str) {
    counter!(
        "dual_sync_corrupt_documents_total",
        "kind" => kind.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record search result count (one sample per page)
pub fn record_search_results(count: usize) {
    histogram!("dual_sync_search_results").record(count as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
