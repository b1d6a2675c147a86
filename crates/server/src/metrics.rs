//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the pulse server:
//! - HTTP request metrics (latency, counts)
//! - Orchestrator status (collected dynamically)
//! - Core pipeline and dispatcher metrics, registered from `pulse_core`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pulse_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pulse_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "pulse_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "pulse_orchestrator_running",
        "Whether the background loops are running (1) or stopped (0)",
    )
    .unwrap()
});

/// In-flight items by current stage.
pub static ITEMS_BY_STAGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pulse_items_by_stage", "In-flight items by current stage"),
        &["stage"],
    )
    .unwrap()
});

/// Items whose current ticket is not confirmed published.
pub static ITEMS_UNDISPATCHED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "pulse_items_undispatched",
        "In-flight items waiting for their ticket to be published",
    )
    .unwrap()
});

/// Items parked for an operator decision.
pub static ITEMS_HELD: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("pulse_items_held", "Items held at a QA stage").unwrap()
});

/// Brokers currently marked unreachable.
pub static BROKERS_DOWN: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("pulse_brokers_down", "Brokers currently marked unreachable").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Orchestrator
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(ITEMS_BY_STAGE.clone())).unwrap();
    registry
        .register(Box::new(ITEMS_UNDISPATCHED.clone()))
        .unwrap();
    registry.register(Box::new(ITEMS_HELD.clone())).unwrap();
    registry.register(Box::new(BROKERS_DOWN.clone())).unwrap();

    // Core metrics (pipeline, dispatcher, background loops)
    for metric in pulse_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the orchestrator's current
/// view.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.orchestrator().status().await;
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    ITEMS_UNDISPATCHED.set(status.undispatched as i64);
    ITEMS_HELD.set(status.held as i64);
    BROKERS_DOWN.set(status.brokers_down.len() as i64);

    ITEMS_BY_STAGE.reset();
    for (stage, count) in &status.by_stage {
        ITEMS_BY_STAGE
            .with_label_values(&[stage.as_str()])
            .set(*count as i64);
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Caller-chosen keys after a collection segment.
static KEYED_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(items|queues|jobs|reachability)/[^/{]+").unwrap());

/// Normalize a path for metric labels (replace IDs and keys with
/// placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = KEYED_SEGMENT.replace_all(&result, "/$1/{id}");
    result.to_string()
}
