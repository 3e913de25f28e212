//! Prometheus metrics for the pool broker
//!
//! This module provides metrics tracking for:
//! - Pool: refresh outcomes and duration, per-source results, snapshot size
//! - Leasing: lease, release and confirm outcomes, table sizes
//! - API: request counts and latency by endpoint
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for snapshot refresh metrics
struct PoolMetrics {
    refreshes: CounterVec,
    refresh_duration: Histogram,
    source_results: CounterVec,
    snapshot_size: Gauge,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Container for lease metrics
struct LeaseMetrics {
    leases: CounterVec,
    releases: CounterVec,
    confirms: Counter,
    reservations: Gauge,
    visited: Gauge,
}

/// Global storage for pool metrics
static POOL_METRICS: OnceLock<PoolMetrics> = OnceLock::new();

/// Global storage for lease metrics
static LEASE_METRICS: OnceLock<LeaseMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become
/// no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = poolbroker::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let pool = PoolMetrics {
        refreshes: register_counter_vec!(
            "poolbroker_refreshes_total",
            "Snapshot refresh cycles by outcome",
            &["outcome"]
        )?,
        refresh_duration: register_histogram!(
            "poolbroker_refresh_duration_seconds",
            "Time spent in one aggregation cycle",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )?,
        source_results: register_counter_vec!(
            "poolbroker_source_results_total",
            "Per-source crawl results",
            &["source", "outcome"]
        )?,
        snapshot_size: register_gauge!(
            "poolbroker_snapshot_size",
            "Number of instances in the current snapshot"
        )?,
        api_requests: register_counter_vec!(
            "poolbroker_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "poolbroker_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    let lease = LeaseMetrics {
        leases: register_counter_vec!(
            "poolbroker_leases_total",
            "Lease requests by outcome",
            &["outcome"]
        )?,
        releases: register_counter_vec!(
            "poolbroker_releases_total",
            "Release requests by outcome",
            &["outcome"]
        )?,
        confirms: register_counter!(
            "poolbroker_confirms_total",
            "Instances confirmed as consumed"
        )?,
        reservations: register_gauge!(
            "poolbroker_active_reservations",
            "Reservations currently held"
        )?,
        visited: register_gauge!(
            "poolbroker_visited_marks",
            "Visited marks currently suppressing instances"
        )?,
    };

    POOL_METRICS.set(pool).map_err(|_| "Pool metrics already initialized")?;
    LEASE_METRICS.set(lease).map_err(|_| "Lease metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    POOL_METRICS.get().is_some() && LEASE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

/// Record one aggregation cycle
pub fn record_refresh(ok: bool, duration_secs: f64) {
    let Some(m) = POOL_METRICS.get() else {
        return;
    };

    m.refreshes.with_label_values(&[outcome(ok)]).inc();
    m.refresh_duration.observe(duration_secs);
}

/// Record the result of crawling one source
pub fn record_source_result(source: &str, ok: bool) {
    if let Some(m) = POOL_METRICS.get() {
        m.source_results
            .with_label_values(&[source, outcome(ok)])
            .inc();
    }
}

/// Update the snapshot size gauge
pub fn set_snapshot_size(size: usize) {
    if let Some(m) = POOL_METRICS.get() {
        m.snapshot_size.set(size as f64);
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = POOL_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record a lease request outcome (`granted` or `exhausted`)
pub fn record_lease(outcome: &str) {
    if let Some(m) = LEASE_METRICS.get() {
        m.leases.with_label_values(&[outcome]).inc();
    }
}

/// Record a release outcome (`released` or `not_found`)
pub fn record_release(outcome: &str) {
    if let Some(m) = LEASE_METRICS.get() {
        m.releases.with_label_values(&[outcome]).inc();
    }
}

/// Record a confirm
pub fn record_confirm() {
    if let Some(m) = LEASE_METRICS.get() {
        m.confirms.inc();
    }
}

/// Update reservation and visited table gauges
pub fn set_table_sizes(reservations: usize, visited: usize) {
    if let Some(m) = LEASE_METRICS.get() {
        m.reservations.set(reservations as f64);
        m.visited.set(visited as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
