//! Request-scoped instrumentation. Correlation ids come from tower-http's
//! request-id layers; this module adds the Prometheus side.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics;

/// Records count and latency for every request, labeled by the matched
/// route template rather than the raw path so path parameters do not
/// explode label cardinality.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let response = next.run(request).await;

    metrics::record_http_request(
        method.as_str(),
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
