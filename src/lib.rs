//! Distributed inventory service: reservation lifecycle, optimistic
//! concurrency over the inventory ledger, per-key distributed locking, and
//! best-effort event publication.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod lock;
pub mod metrics;
pub mod middleware_helpers;
pub mod services;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::events::{EventBus, EventPublisher, MemoryEventBus, RedisEventBus};
use crate::lock::{LockManager, MemoryLockManager, RedisLockManager};
use crate::services::inventory::InventoryService;
use crate::services::reservations::ReservationService;
use crate::services::stores::StoreService;

/// Business logic layer handed to every request through [`AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub inventory: InventoryService,
    pub stores: StoreService,
    pub reservations: ReservationService,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        lock: Arc<dyn LockManager>,
        publisher: EventPublisher,
        config: &AppConfig,
    ) -> Self {
        let inventory = InventoryService::new(db.clone(), lock, publisher, config);
        let stores = StoreService::new(db.clone());
        let reservations = ReservationService::new(db, inventory.clone());
        Self {
            inventory,
            stores,
            reservations,
        }
    }
}

/// Application state shared with the handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    pub publisher: EventPublisher,
    pub started_at: Instant,
}

/// Builds the concrete event bus and lock manager for the configured
/// backend. Both share one Redis connection manager; the `memory` backend
/// keeps everything in-process.
pub async fn build_backends(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn EventBus>, Arc<dyn LockManager>)> {
    match config.event_bus_backend.as_str() {
        "memory" => Ok((
            Arc::new(MemoryEventBus::new()),
            Arc::new(MemoryLockManager::new()),
        )),
        "redis" => {
            let client = redis::Client::open(config.redis_url.as_str())?;
            let conn = client.get_tokio_connection_manager().await?;
            Ok((
                Arc::new(RedisEventBus::new(conn.clone())),
                Arc::new(RedisLockManager::new(conn)),
            ))
        }
        other => anyhow::bail!("unsupported event bus backend: {other}"),
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Inventory API",
        version = "1.0.0",
        description = "Distributed inventory service with reservation lifecycle and optimistic concurrency control",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    paths(
        handlers::inventory::reserve_stock,
        handlers::inventory::confirm_reservation,
        handlers::inventory::consume_reservation,
        handlers::inventory::cancel_reservation,
        handlers::inventory::update_stock,
        handlers::inventory::get_stock_level,
        handlers::inventory::get_all_inventory,
        handlers::inventory::get_all_products,
        handlers::stores::get_all_stores,
        handlers::stores::get_store,
        handlers::stores::get_store_inventory,
    ),
    components(schemas(
        handlers::inventory::ReserveStockRequest,
        handlers::inventory::ConfirmReservationRequest,
        handlers::inventory::ConsumeReservationRequest,
        handlers::inventory::UpdateStockRequest,
        handlers::inventory::StockOperation,
        handlers::common::MessageResponse,
        services::inventory::ReservationResponse,
        services::inventory::StockLevel,
        services::inventory::InventoryView,
        services::inventory::ProductView,
        services::stores::StoreView,
        services::stores::StoreInventoryView,
        entities::reservation::ReservationStatus,
        errors::ErrorResponse,
        errors::ErrorDetail,
    )),
    tags(
        (name = "Inventory", description = "Reservation lifecycle and stock mutations"),
        (name = "Stores", description = "Read-only store queries"),
    )
)]
pub struct ApiDoc;

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": { "code": "NOT_FOUND", "message": "Not Found" } })),
    )
}

/// Assembles the full application router with middleware applied.
pub fn app_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/inventory", handlers::inventory::inventory_routes())
        .nest("/stores", handlers::stores::stores_routes())
        .nest("/health", health::health_routes())
        .fallback(not_found)
        .route_layer(axum::middleware::from_fn(middleware_helpers::track_metrics))
        .layer(middleware)
        .with_state(state)
}
