use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{audit, handlers, items, middleware::metrics_middleware, orchestrator, topology};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Topology
        .route("/queues", get(topology::list_queues))
        .route("/queues/{key}", get(topology::get_queue))
        .route("/jobs", get(topology::list_jobs))
        .route("/jobs/{key}", get(topology::get_job))
        .route("/reachability", get(topology::get_reachability))
        .route(
            "/reachability/{key}",
            get(topology::get_key_reachability).put(topology::put_key_reachability),
        )
        .route("/pipeline", get(topology::get_pipeline))
        .route("/topology/reload", post(topology::reload))
        // Items
        .route("/items", post(items::submit_item).get(items::list_items))
        .route("/items/{id}", get(items::get_item))
        .route("/items/{id}/history", get(items::get_history))
        .route("/items/{id}/audit", get(audit::item_trail))
        .route("/items/{id}/resubmit", post(items::resubmit_item))
        .route("/items/{id}/cancel", post(items::cancel_item))
        // Worker reports
        .route("/reports", post(items::submit_report))
        // Orchestrator
        .route("/orchestrator/status", get(orchestrator::get_status))
        // Audit
        .route("/audit", get(audit::query_audit));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
