//! Request metrics middleware.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};
use prometheus::IntGauge;
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Holds one in-flight slot, released on drop so a cancelled request
/// does not leak it.
struct InFlight(&'static IntGauge);

impl InFlight {
    fn enter(gauge: &'static IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// The route template when the router matched one (`/api/v1/items/{id}`),
/// otherwise the raw path with keys masked so unmatched requests cannot
/// blow up label cardinality.
fn route_label(request: &Request<Body>) -> String {
    match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => normalize_path(request.uri().path()),
    }
}

/// Records duration, count and in-flight requests per method, route and
/// status.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let route = route_label(&request);
    let _slot = InFlight::enter(&HTTP_REQUESTS_IN_FLIGHT);
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let labels = [method.as_str(), route.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(start.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}
