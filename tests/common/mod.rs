//! Test harness: application state backed by an in-memory SQLite database,
//! a process-local lock manager, and a recording event bus. No external
//! services are required.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;
use uuid::Uuid;

use inventory_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{self, inventory, product, reservation, store},
    events::{EventPublisher, MemoryEventBus},
    lock::{LockManager, MemoryLockManager},
    AppServices, AppState,
};

/// Application harness over in-memory infrastructure.
pub struct TestApp {
    pub state: AppState,
    pub bus: Arc<MemoryEventBus>,
    pub lock: Arc<MemoryLockManager>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        redis_url: "redis://localhost:6379".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        event_bus_backend: "memory".to_string(),
        event_topic: "inventory_events".to_string(),
        reservation_ttl_minutes: 15,
        lock_ttl_seconds: 30,
        max_reservation_quantity: 1000,
        sweeper_interval_seconds: 60,
        // single connection so the in-memory database outlives every request
        db_max_connections: 1,
        log_level: "info".to_string(),
        log_json: false,
    }
}

pub async fn spawn_app() -> TestApp {
    let config = test_config();
    let db = Arc::new(
        db::establish_connection(&config)
            .await
            .expect("database connection"),
    );
    db::init_schema(&db).await.expect("schema init");

    let bus = Arc::new(MemoryEventBus::new());
    let lock = Arc::new(MemoryLockManager::new());
    let publisher = EventPublisher::new(bus.clone(), db.clone(), config.event_topic.clone());
    let services = AppServices::new(
        db.clone(),
        lock.clone() as Arc<dyn LockManager>,
        publisher.clone(),
        &config,
    );

    let state = AppState {
        db,
        config,
        services,
        publisher,
        started_at: Instant::now(),
    };

    TestApp { state, bus, lock }
}

impl TestApp {
    pub fn router(&self) -> Router {
        app_router(self.state.clone())
    }

    /// Sends one request through the router and returns status + JSON body.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = self.router().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn seed_inventory(
        &self,
        available: i32,
        reserved: i32,
        version: i32,
    ) -> (Uuid, Uuid) {
        let (product_id, store_id) = seed_catalog(&self.state.db).await;
        seed_inventory_row(&self.state.db, product_id, store_id, available, reserved, version)
            .await;
        (product_id, store_id)
    }

    pub async fn inventory(&self, product_id: Uuid, store_id: Uuid) -> inventory::Model {
        db::find_inventory(&*self.state.db, product_id, store_id)
            .await
            .expect("inventory query")
            .expect("inventory row")
    }

    pub async fn reservation(&self, reservation_id: Uuid) -> reservation::Model {
        db::find_reservation(&*self.state.db, reservation_id)
            .await
            .expect("reservation query")
            .expect("reservation row")
    }

    pub async fn reservation_count(&self) -> u64 {
        use sea_orm::PaginatorTrait;
        entities::Reservation::find()
            .count(&*self.state.db)
            .await
            .expect("reservation count")
    }

    /// Rewrites a reservation deadline, simulating the passage of time.
    pub async fn set_reservation_deadline(&self, reservation_id: Uuid, expires_at: DateTime<Utc>) {
        entities::Reservation::update_many()
            .col_expr(reservation::Column::ExpiresAt, Expr::value(expires_at))
            .filter(reservation::Column::Id.eq(reservation_id))
            .exec(&*self.state.db)
            .await
            .expect("deadline update");
    }
}

pub async fn seed_catalog(db: &DatabaseConnection) -> (Uuid, Uuid) {
    let product_id = Uuid::new_v4();
    let sku = format!("SKU-{}", product_id.simple().to_string().to_uppercase());
    product::ActiveModel {
        id: Set(product_id),
        sku: Set(sku),
        name: Set("Test Product".to_string()),
        description: Set(None),
        category: Set("Electronics".to_string()),
        unit_price_minor: Set(249_999),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed product");

    let store_id = Uuid::new_v4();
    store::ActiveModel {
        id: Set(store_id),
        name: Set("Downtown Store".to_string()),
        address: Set("1 Main St".to_string()),
        city: Set("Springfield".to_string()),
        country: Set("US".to_string()),
        zip_code: Set("12345".to_string()),
        status: Set("active".to_string()),
        timezone: Set("UTC".to_string()),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed store");

    (product_id, store_id)
}

pub async fn seed_inventory_row(
    db: &DatabaseConnection,
    product_id: Uuid,
    store_id: Uuid,
    available: i32,
    reserved: i32,
    version: i32,
) {
    inventory::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        store_id: Set(store_id),
        available: Set(available),
        reserved: Set(reserved),
        total: Set(available + reserved),
        version: Set(version),
        last_updated: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed inventory");
}
