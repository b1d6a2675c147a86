//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipeline (transitions, duplicates, terminal items, in-flight gauge)
//! - Dispatcher (publishes, retries, latency, unreachable fast-fails)
//! - Orchestrator loops (timeouts, redispatches)
//! - Audit trail (records written, records lost)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Pipeline
// =============================================================================

/// Applied transitions by lineage and outcome.
pub static TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_transitions_total", "Applied stage transitions"),
        &["lineage", "outcome"],
    )
    .unwrap()
});

/// Reports ignored because they were stale or repeated.
pub static DUPLICATE_REPORTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pulse_duplicate_reports_total",
            "Worker reports recorded as no-ops",
        ),
        &["reason"], // "terminal", "stage_mismatch", "stale_ticket", "held"
    )
    .unwrap()
});

/// Items reaching a terminal position.
pub static ITEMS_TERMINATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_items_terminated_total", "Items reaching a terminal state"),
        &["lineage", "result"], // "success", "failed"
    )
    .unwrap()
});

/// Items submitted by lineage.
pub static ITEMS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_items_submitted_total", "Items entering the pipeline"),
        &["lineage"],
    )
    .unwrap()
});

/// Items currently tracked in memory.
pub static ITEMS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("pulse_items_in_flight", "Items not yet in a terminal state").unwrap()
});

// =============================================================================
// Dispatcher
// =============================================================================

/// Publish attempts by broker and result.
pub static PUBLISHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_publishes_total", "Work ticket publishes"),
        &["broker", "result"], // "ok", "unreachable", "routing_error"
    )
    .unwrap()
});

/// Publish retries after a transport failure.
pub static PUBLISH_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_publish_retries_total", "Publish retries with backoff"),
        &["broker"],
    )
    .unwrap()
});

/// Publish latency including retries.
pub static PUBLISH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pulse_publish_duration_seconds",
            "Time to publish a work ticket, including retries",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["broker"],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator
// =============================================================================

/// Timeout reports generated by the sweeper.
pub static STAGE_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_stage_timeouts_total", "Stage deadlines missed"),
        &["stage"],
    )
    .unwrap()
});

/// Tickets republished by the redispatch loop.
pub static REDISPATCHES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "pulse_redispatches_total",
        "Work tickets republished after a failed dispatch",
    )
    .unwrap()
});

// =============================================================================
// Audit
// =============================================================================

/// Audit records committed to the store.
pub static AUDIT_RECORDS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("pulse_audit_records_written_total", "Audit records committed")
        .unwrap()
});

/// Audit records that never reached the store, by cause.
pub static AUDIT_RECORDS_LOST: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_audit_records_lost_total", "Audit records not stored"),
        &["cause"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Pipeline
        Box::new(TRANSITIONS_TOTAL.clone()),
        Box::new(DUPLICATE_REPORTS.clone()),
        Box::new(ITEMS_TERMINATED.clone()),
        Box::new(ITEMS_SUBMITTED.clone()),
        Box::new(ITEMS_IN_FLIGHT.clone()),
        // Dispatcher
        Box::new(PUBLISHES_TOTAL.clone()),
        Box::new(PUBLISH_RETRIES.clone()),
        Box::new(PUBLISH_DURATION.clone()),
        // Orchestrator
        Box::new(STAGE_TIMEOUTS.clone()),
        Box::new(REDISPATCHES.clone()),
        // Audit
        Box::new(AUDIT_RECORDS_WRITTEN.clone()),
        Box::new(AUDIT_RECORDS_LOST.clone()),
    ]
}
