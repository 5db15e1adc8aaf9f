//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Source transaction throughput and acknowledgement outcomes
//! - Event store writes (new vs. duplicate)
//! - Bus polling and sink delivery
//! - Cross-service HTTP polling
//! - Sync HTTP service request outcomes
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use manifest_sync::metrics;
//! use std::time::Duration;
//!
//! // After committing a transaction to the event log
//! metrics::record_event_store_write("tx-42", true, 3);
//!
//! // After polling a remote sync service
//! metrics::record_remote_poll("billing-service", true, Duration::from_millis(12));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a transaction read from a source data store.
pub fn record_transaction_read(data_store_slug: &str, operations: usize) {
    counter!("sync_transactions_read_total", "data_store" => data_store_slug.to_string()).increment(1);
    counter!("sync_operations_read_total", "data_store" => data_store_slug.to_string())
        .increment(operations as u64);
}

/// Record a transaction acknowledgement back to its source.
pub fn record_transaction_ack(data_store_slug: &str, consumed: bool) {
    let status = if consumed { "consumed" } else { "rejected" };
    counter!("sync_transaction_acks_total", "data_store" => data_store_slug.to_string(), "status" => status).increment(1);
}

/// Record public schema transformation results for one transaction.
pub fn record_transformations(data_store_slug: &str, produced: usize, duration: Duration) {
    counter!("sync_transformed_operations_total", "data_store" => data_store_slug.to_string())
        .increment(produced as u64);
    histogram!("sync_transform_duration_seconds", "data_store" => data_store_slug.to_string())
        .record(duration.as_secs_f64());
}

/// Record an event store write. `accepted` is false for idempotent
/// replays of an already-stored transaction id.
pub fn record_event_store_write(transaction_id: &str, accepted: bool, operations: usize) {
    let status = if accepted { "accepted" } else { "duplicate" };
    counter!("sync_event_store_writes_total", "status" => status).increment(1);
    if accepted {
        counter!("sync_event_store_operations_total").increment(operations as u64);
    }
    // Transaction id is high-cardinality; keep it out of labels.
    let _ = transaction_id;
}

/// Record event store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn event_store_retries_total(operation: &str) {
    counter!("sync_event_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a bus poll against the local event store.
pub fn record_bus_poll(messages: usize, duration: Duration) {
    counter!("sync_bus_polls_total").increment(1);
    if messages > 0 {
        counter!("sync_bus_messages_total").increment(messages as u64);
    }
    histogram!("sync_bus_poll_duration_seconds").record(duration.as_secs_f64());
}

/// Record sink delivery for one transaction at one destination.
pub fn record_sink_write(destination: &str, operations: usize, duration: Duration) {
    counter!("sync_sink_writes_total", "destination" => destination.to_string()).increment(1);
    counter!("sync_sink_operations_total", "destination" => destination.to_string())
        .increment(operations as u64);
    histogram!("sync_sink_write_duration_seconds", "destination" => destination.to_string())
        .record(duration.as_secs_f64());
}

/// Record sink delivery failure.
pub fn record_sink_error(destination: &str) {
    counter!("sync_sink_errors_total", "destination" => destination.to_string()).increment(1);
}

/// Record a poll against a remote sync service.
pub fn record_remote_poll(manifest_slug: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("sync_remote_polls_total", "manifest" => manifest_slug.to_string(), "status" => status).increment(1);
    histogram!("sync_remote_poll_duration_seconds", "manifest" => manifest_slug.to_string())
        .record(duration.as_secs_f64());
}

/// Record a retry against a remote sync service.
pub fn record_remote_retry(manifest_slug: &str) {
    counter!("sync_remote_retries_total", "manifest" => manifest_slug.to_string()).increment(1);
}

/// Record a sync HTTP service request outcome.
pub fn record_http_request(route: &str, status: u16) {
    counter!(
        "sync_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record errors by type.
pub fn record_error(component: &str, error_type: &str) {
    counter!("sync_errors_total", "component" => component.to_string(), "error_type" => error_type.to_string()).increment(1);
}

/// Gauge for number of active source iterators.
pub fn set_active_sources(count: usize) {
    gauge!("sync_active_sources").set(count as f64);
}

/// Gauge for controller state.
pub fn set_controller_state(state: &str) {
    // Encode state as numeric for alerting (0=initial, .., 4=closed)
    let value = match state {
        "initial" => 0.0,
        "prepared" => 1.0,
        "started" => 2.0,
        "stopped" => 3.0,
        "closed" => 4.0,
        _ => -1.0,
    };
    gauge!("sync_controller_state").set(value);
}
