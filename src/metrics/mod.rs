//! Prometheus metrics: HTTP request instrumentation plus the business-level
//! reservation counter and per-(product, store) stock gauge. Exposed in text
//! format at `/health/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use tracing::warn;
use uuid::Uuid;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    static ref HTTP_REQUESTS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            opts!("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status_code"],
        )
        .expect("metric definition");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric registration");
        counter
    };
    static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = {
        let histogram = HistogramVec::new(
            histogram_opts!(
                "http_request_duration_seconds",
                "HTTP request duration in seconds"
            ),
            &["method", "endpoint"],
        )
        .expect("metric definition");
        REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("metric registration");
        histogram
    };
    static ref INVENTORY_RESERVATIONS_TOTAL: IntCounterVec = {
        let counter = IntCounterVec::new(
            opts!(
                "inventory_reservations_total",
                "Total inventory reservation transitions"
            ),
            &["status"],
        )
        .expect("metric definition");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric registration");
        counter
    };
    static ref INVENTORY_STOCK_LEVEL: IntGaugeVec = {
        let gauge = IntGaugeVec::new(
            opts!("inventory_stock_level", "Current available stock level"),
            &["product_id", "store_id"],
        )
        .expect("metric definition");
        REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("metric registration");
        gauge
    };
}

pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, seconds: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status_code.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(seconds);
}

/// Counts a reservation lifecycle transition by resulting status.
pub fn record_reservation(status: &str) {
    INVENTORY_RESERVATIONS_TOTAL
        .with_label_values(&[status])
        .inc();
}

pub fn set_stock_level(product_id: Uuid, store_id: Uuid, available: i64) {
    INVENTORY_STOCK_LEVEL
        .with_label_values(&[&product_id.to_string(), &store_id.to_string()])
        .set(available);
}

/// Renders the registry in Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
