//! Health, readiness, and metrics endpoints.
//!
//! Readiness probes the database and the event bus over their shared
//! long-lived connections; neither probe tears anything down.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::metrics;
use crate::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_exposition))
}

async fn health_check(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "service": "inventory-api",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    let database_ok = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "database readiness probe failed");
            false
        }
    };

    let event_bus_ok = match state.publisher.healthcheck().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "event bus readiness probe failed");
            false
        }
    };

    let ready = database_ok && event_bus_ok;
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "timestamp": Utc::now(),
        "database": if database_ok { "connected" } else { "disconnected" },
        "event_bus": if event_bus_ok { "connected" } else { "disconnected" },
    });

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}

async fn metrics_exposition() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
        .into_response()
}
