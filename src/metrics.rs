//! Prometheus metrics for feed processing and book health.
//!
//! This module provides metrics for:
//! - Events applied per kind and their processing latency
//! - Known upstream anomalies absorbed as no-ops
//! - Events dropped because their market is no longer active
//! - Bin evictions and invariant repairs

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::book::Side;

// === Metric Name Constants ===

/// Event apply latency metric name.
pub const METRIC_EVENT_APPLY_LATENCY: &str = "book_event_apply_latency_ms";
/// Events applied counter metric name.
pub const METRIC_EVENTS_APPLIED: &str = "book_events_applied_total";
/// Stale events counter metric name.
pub const METRIC_STALE_EVENTS: &str = "book_stale_events_total";
/// Anomalies counter metric name.
pub const METRIC_ANOMALIES: &str = "book_anomalies_total";
/// Bin evictions counter metric name.
pub const METRIC_BIN_EVICTIONS: &str = "book_bin_evictions_total";
/// Re-sorts counter metric name.
pub const METRIC_BOOK_RESORTS: &str = "book_resorts_total";
/// Ownership re-checks counter metric name.
pub const METRIC_OWNERSHIP_RECHECKS: &str = "book_ownership_rechecks_total";
/// Order count gauge metric name.
pub const METRIC_ORDER_COUNT: &str = "book_orders";

/// Zero-quantity insert.
pub const ANOMALY_ZERO_QUANTITY: &str = "zero_quantity";
/// Remove for an id not in the book.
pub const ANOMALY_UNKNOWN_REMOVE: &str = "unknown_remove";
/// Quantity update for an id not in the book.
pub const ANOMALY_UNKNOWN_UPDATE: &str = "unknown_update";
/// Epoch announcement older than the last applied one.
pub const ANOMALY_STALE_EPOCH: &str = "stale_epoch";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_EVENT_APPLY_LATENCY,
        "Time to apply one book event in milliseconds"
    );

    describe_counter!(METRIC_EVENTS_APPLIED, "Total number of book events applied");
    describe_counter!(
        METRIC_STALE_EVENTS,
        "Total number of events dropped for an inactive market"
    );
    describe_counter!(
        METRIC_ANOMALIES,
        "Total number of known upstream anomalies absorbed"
    );
    describe_counter!(
        METRIC_BIN_EVICTIONS,
        "Total number of tail bins evicted for capacity"
    );
    describe_counter!(
        METRIC_BOOK_RESORTS,
        "Total number of sides found out of rate order and re-sorted"
    );
    describe_counter!(
        METRIC_OWNERSHIP_RECHECKS,
        "Total number of ownership annotation passes"
    );
    describe_gauge!(METRIC_ORDER_COUNT, "Orders currently mirrored");

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and return a handle for rendering.
pub fn install_prometheus() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

/// Increment events applied counter.
pub fn inc_events_applied(kind: &'static str) {
    counter!(METRIC_EVENTS_APPLIED, "kind" => kind).increment(1);
}

/// Increment stale events counter.
pub fn inc_stale_events() {
    counter!(METRIC_STALE_EVENTS).increment(1);
}

/// Increment anomalies counter.
pub fn inc_anomalies(kind: &'static str) {
    counter!(METRIC_ANOMALIES, "kind" => kind).increment(1);
}

/// Increment bin evictions counter.
pub fn inc_bin_evictions(side: Side) {
    counter!(METRIC_BIN_EVICTIONS, "side" => side.to_string()).increment(1);
}

/// Increment re-sorts counter.
pub fn inc_book_resorts() {
    counter!(METRIC_BOOK_RESORTS).increment(1);
}

/// Increment ownership re-checks counter.
pub fn inc_ownership_rechecks() {
    counter!(METRIC_OWNERSHIP_RECHECKS).increment(1);
}

/// Set the mirrored order count.
pub fn set_order_count(count: usize) {
    gauge!(METRIC_ORDER_COUNT).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for applying a book event.
pub fn timer_event_apply() -> LatencyTimer {
    LatencyTimer::new(METRIC_EVENT_APPLY_LATENCY)
}
