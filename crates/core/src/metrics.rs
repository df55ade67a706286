//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Deployments (outcomes, durations, leaked instances)
//! - Provisioning (launches, terminations, address waits)
//! - Health monitoring (per-role outcomes)
//! - Bundles and wire transfers

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Deployment Metrics
// =============================================================================

/// Deployments finished, by result.
pub static DEPLOYS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gantry_deploys_total", "Total deployments finished"),
        &["result"], // "success", "error"
    )
    .unwrap()
});

/// End-to-end deployment duration in seconds.
pub static DEPLOY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gantry_deploy_duration_seconds",
            "End-to-end duration of deployments",
        )
        .buckets(vec![
            30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0,
        ]),
        &["result"],
    )
    .unwrap()
});

/// Instances that could not be cleanly terminated and were flagged for
/// manual operator cleanup.
pub static UNTERMINATED_INSTANCES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "gantry_unterminated_instances_total",
        "Instances left running after failed termination",
    )
    .unwrap()
});

// =============================================================================
// Provisioning Metrics
// =============================================================================

/// Instances launched total.
pub static INSTANCES_LAUNCHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("gantry_instances_launched_total", "Total instances launched").unwrap()
});

/// Instances terminated total.
pub static INSTANCES_TERMINATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "gantry_instances_terminated_total",
        "Total instances terminated",
    )
    .unwrap()
});

/// Seconds spent waiting for public address assignment per launch.
pub static ADDRESS_WAIT: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "gantry_address_wait_seconds",
            "Time until all launched instances had public addresses",
        )
        .buckets(vec![5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )
    .unwrap()
});

// =============================================================================
// Health Monitoring Metrics
// =============================================================================

/// Monitor outcomes by kind and instance role.
pub static MONITOR_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gantry_monitor_outcomes_total", "Health monitor outcomes"),
        &["outcome", "role"], // outcome: "ready", "failed", "timed_out"; role: "builder", "server"
    )
    .unwrap()
});

// =============================================================================
// Bundle and Wire Transfer Metrics
// =============================================================================

/// Size of built bundle archives in bytes.
pub static BUNDLE_BYTES: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("gantry_bundle_bytes", "Size of built bundle archives").buckets(vec![
            1e6, 1e7, 5e7, 1e8, 5e8, 1e9, 5e9,
        ]),
    )
    .unwrap()
});

/// Wire transfers of the bundle to routing servers, by result.
pub static WIRE_TRANSFERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gantry_wire_transfers_total", "Bundle wire transfers"),
        &["result"], // "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Deployments
        Box::new(DEPLOYS_TOTAL.clone()),
        Box::new(DEPLOY_DURATION.clone()),
        Box::new(UNTERMINATED_INSTANCES.clone()),
        // Provisioning
        Box::new(INSTANCES_LAUNCHED.clone()),
        Box::new(INSTANCES_TERMINATED.clone()),
        Box::new(ADDRESS_WAIT.clone()),
        // Monitoring
        Box::new(MONITOR_OUTCOMES.clone()),
        // Bundles
        Box::new(BUNDLE_BYTES.clone()),
        Box::new(WIRE_TRANSFERS.clone()),
    ]
}
