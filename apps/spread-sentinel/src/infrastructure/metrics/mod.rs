//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Quotes appended and dropped per exchange, cohort restarts
//! - **Storage**: Pool acquisition attempts, storage failures
//! - **Alerting**: Reports sent and failed, tracked and cooling-down spreads
//! - **Latency**: Spread cycle duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::quote::Exchange;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, once.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns the exporter error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "spread_sentinel_quotes_appended_total",
        "Quotes persisted, by exchange"
    );
    describe_counter!(
        "spread_sentinel_quotes_dropped_total",
        "Quotes or messages dropped, by exchange and reason"
    );
    describe_counter!(
        "spread_sentinel_cohort_restarts_total",
        "Ingestion cohort restarts"
    );

    describe_counter!(
        "spread_sentinel_pool_attempts_total",
        "Storage pool connection attempts, by outcome"
    );
    describe_counter!(
        "spread_sentinel_storage_failures_total",
        "Storage operation failures, by operation"
    );

    describe_counter!(
        "spread_sentinel_alerts_total",
        "Spreads included in reports, by delivery outcome"
    );
    describe_gauge!(
        "spread_sentinel_tracked_spreads",
        "Spreads currently tracked as alert candidates"
    );
    describe_gauge!(
        "spread_sentinel_cooldown_spreads",
        "Spread keys currently suppressed after an alert"
    );

    describe_histogram!(
        "spread_sentinel_cycle_seconds",
        "Duration of one spread query and alert cycle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a message did not end up in storage.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Normalizer rejected the message.
    Malformed,
    /// Append failed.
    StorageFailed,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::StorageFailed => "storage_failed",
        }
    }
}

/// Delivery outcome of a report.
#[derive(Debug, Clone, Copy)]
pub enum AlertOutcome {
    /// Report accepted by the relay.
    Sent,
    /// Delivery failed, batch dropped.
    Failed,
}

impl AlertOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Storage operation label.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    /// Quote append.
    Append,
    /// Spread query.
    Query,
    /// Schema migration.
    Migrate,
}

impl StorageOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Query => "query",
            Self::Migrate => "migrate",
        }
    }
}

/// Record a persisted quote.
pub fn record_quote_appended(exchange: Exchange) {
    counter!(
        "spread_sentinel_quotes_appended_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record a dropped message or quote.
pub fn record_quote_dropped(exchange: Exchange, reason: DropReason) {
    counter!(
        "spread_sentinel_quotes_dropped_total",
        "exchange" => exchange.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record an ingestion cohort restart.
pub fn record_cohort_restart() {
    counter!("spread_sentinel_cohort_restarts_total").increment(1);
}

/// Record a pool connection attempt.
pub fn record_pool_attempt(success: bool) {
    counter!(
        "spread_sentinel_pool_attempts_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a failed storage operation.
pub fn record_storage_failure(operation: StorageOperation) {
    counter!(
        "spread_sentinel_storage_failures_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record spreads included in a report.
pub fn record_alert(outcome: AlertOutcome, spreads: usize) {
    counter!(
        "spread_sentinel_alerts_total",
        "outcome" => outcome.as_str()
    )
    .increment(spreads as u64);
}

/// Update tracked and cooling-down spread gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_tracking_sizes(tracked: usize, cooling_down: usize) {
    gauge!("spread_sentinel_tracked_spreads").set(tracked as f64);
    gauge!("spread_sentinel_cooldown_spreads").set(cooling_down as f64);
}

/// Record spread cycle duration.
pub fn record_cycle_duration(duration: Duration) {
    histogram!("spread_sentinel_cycle_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
