// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emitted through the `metrics` facade. The binary installs no exporter,
//! so these are no-ops unless an embedding application installs a recorder.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `bucket_sync_`:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track durations in seconds
//!
//! # Usage
//!
//! ```rust,no_run
//! use bucket_sync::metrics;
//! use bucket_sync::outcome::OutcomeKind;
//! use std::time::Duration;
//!
//! metrics::record_keys_enumerated(1000);
//! metrics::record_outcome(OutcomeKind::Inserted);
//! metrics::record_run_complete("completed", Duration::from_secs(12));
//! ```

use crate::outcome::OutcomeKind;
use crate::store::{StoreOp, StoreRole};
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the terminal outcome of one key.
pub fn record_outcome(kind: OutcomeKind) {
    counter!("bucket_sync_keys_total", "outcome" => kind.as_str()).increment(1);
}

/// Record keys returned by the source index.
pub fn record_keys_enumerated(count: usize) {
    counter!("bucket_sync_keys_enumerated_total").increment(count as u64);
}

/// Record a store connection attempt.
pub fn record_store_connection(role: StoreRole, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("bucket_sync_store_connections_total", "role" => role.as_str(), "status" => status)
        .increment(1);
}

/// Record the latency of one store call.
pub fn record_store_operation(role: StoreRole, op: StoreOp, latency: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    histogram!(
        "bucket_sync_store_operation_seconds",
        "role" => role.as_str(),
        "op" => op.as_str(),
        "status" => status
    )
    .record(latency.as_secs_f64());
}

/// Record the end of a run.
pub fn record_run_complete(status: &'static str, duration: Duration) {
    counter!("bucket_sync_runs_total", "status" => status).increment(1);
    histogram!("bucket_sync_run_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

/// Record the coordinator's current run state (as its numeric code).
pub fn set_run_state(state: &'static str, code: u8) {
    gauge!("bucket_sync_run_state", "state" => state).set(code as f64);
}
