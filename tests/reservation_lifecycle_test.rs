//! Service-level lifecycle scenarios: the literal flows from the reservation
//! state machine, counter effects on the ledger, and failure semantics.

mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use inventory_api::{
    db,
    entities::reservation::ReservationStatus,
    errors::ServiceError,
    events::{EventBus, EventBusError, EventEnvelope, EventPublisher},
    lock::{inventory_lock_key, LockManager, MemoryLockManager},
    services::inventory::{ReservationRequest, StockUpdate},
    AppServices,
};

fn reserve_request(product_id: Uuid, store_id: Uuid, quantity: i32) -> ReservationRequest {
    ReservationRequest {
        order_id: "ORDER-1".to_string(),
        product_id,
        store_id,
        quantity,
        ttl_minutes: Some(15),
    }
}

#[tokio::test]
async fn happy_path_reserve_confirm_consume() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let response = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 3))
        .await
        .expect("reserve");
    assert_eq!(response.status, ReservationStatus::Pending);

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (2, 3, 5));
    assert_eq!(inv.version, 2);

    app.state
        .services
        .inventory
        .confirm_reservation(response.reservation_id, "ORDER-1")
        .await
        .expect("confirm");

    let row = app.reservation(response.reservation_id).await;
    assert_eq!(row.status(), Some(ReservationStatus::Confirmed));
    assert!(row.confirmed_at.is_some());

    // Confirm changes no counters
    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total, inv.version), (2, 3, 5, 2));

    app.state
        .services
        .inventory
        .consume_reservation(response.reservation_id)
        .await
        .expect("consume");

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (2, 0, 2));
    assert_eq!(inv.version, 3);

    let row = app.reservation(response.reservation_id).await;
    assert_eq!(row.status(), Some(ReservationStatus::Consumed));

    let events: Vec<String> = app
        .bus
        .published()
        .await
        .into_iter()
        .map(|(topic, envelope)| {
            assert_eq!(topic, "inventory_events");
            envelope.event_type
        })
        .collect();
    assert_eq!(
        events,
        vec![
            "reservation_created",
            "reservation_confirmed",
            "reservation_consumed"
        ]
    );
}

#[tokio::test]
async fn cancel_restores_counters() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let response = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 2))
        .await
        .expect("reserve");

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total, inv.version), (3, 2, 5, 2));

    app.state
        .services
        .inventory
        .cancel_reservation(response.reservation_id)
        .await
        .expect("cancel");

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (5, 0, 5));
    // version advanced exactly twice: reserve + cancel
    assert_eq!(inv.version, 3);

    let row = app.reservation(response.reservation_id).await;
    assert_eq!(row.status(), Some(ReservationStatus::Cancelled));
    assert!(row.cancelled_at.is_some());
}

#[tokio::test]
async fn lazy_expiry_on_confirm() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let response = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 2))
        .await
        .expect("reserve");

    app.set_reservation_deadline(
        response.reservation_id,
        Utc::now() - ChronoDuration::seconds(120),
    )
    .await;

    let result = app
        .state
        .services
        .inventory
        .confirm_reservation(response.reservation_id, "ORDER-1")
        .await;
    assert_matches!(result, Err(ServiceError::ReservationExpired(_)));

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (5, 0, 5));
    assert_eq!(inv.version, 3);

    let row = app.reservation(response.reservation_id).await;
    assert_eq!(row.status(), Some(ReservationStatus::Expired));
}

#[tokio::test]
async fn expire_is_idempotent() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let response = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 2))
        .await
        .expect("reserve");

    app.set_reservation_deadline(
        response.reservation_id,
        Utc::now() - ChronoDuration::seconds(1),
    )
    .await;

    let first = app
        .state
        .services
        .inventory
        .expire_reservation(response.reservation_id)
        .await
        .expect("expire");
    assert!(first);

    let second = app
        .state
        .services
        .inventory
        .expire_reservation(response.reservation_id)
        .await
        .expect("second expire");
    assert!(!second);

    // no double credit
    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (5, 0, 5));
    assert_eq!(inv.version, 3);
}

#[tokio::test]
async fn sweeper_releases_stale_pending_holds() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let response = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 2))
        .await
        .expect("reserve");

    app.set_reservation_deadline(
        response.reservation_id,
        Utc::now() - ChronoDuration::seconds(5),
    )
    .await;

    let outcome = app
        .state
        .services
        .reservations
        .sweep_expired()
        .await
        .expect("sweep");
    assert_eq!(outcome.expired_count, 1);

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (5, 0, 5));

    // a second sweep finds nothing
    let outcome = app
        .state
        .services
        .reservations
        .sweep_expired()
        .await
        .expect("second sweep");
    assert_eq!(outcome.expired_count, 0);
}

#[tokio::test]
async fn lock_unavailable_leaves_ledger_untouched() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let key = inventory_lock_key(product_id, store_id);
    assert!(app.lock.acquire(&key, Duration::from_secs(30)).await);

    let result = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 3))
        .await;
    assert_matches!(result, Err(ServiceError::LockUnavailable(_)));

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total, inv.version), (5, 0, 5, 1));
    assert_eq!(app.reservation_count().await, 0);
}

#[tokio::test]
async fn insufficient_stock_reports_available_and_requested() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(2, 0, 1).await;

    let result = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 3))
        .await;

    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock {
            available: 2,
            requested: 3
        })
    );
}

#[tokio::test]
async fn admin_stock_adjustments() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(10, 2, 4).await;

    app.state
        .services
        .inventory
        .update_stock(StockUpdate {
            product_id,
            store_id,
            quantity_change: 5,
            reason: "stock-in".to_string(),
            reference_id: None,
        })
        .await
        .expect("stock-in");

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total), (15, 2, 17));
    assert_eq!(inv.version, 5);

    // a write-off that would drive available negative is rejected without mutation
    let result = app
        .state
        .services
        .inventory
        .update_stock(StockUpdate {
            product_id,
            store_id,
            quantity_change: -20,
            reason: "write-off".to_string(),
            reference_id: None,
        })
        .await;
    assert_matches!(result, Err(ServiceError::Business(_)));

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!((inv.available, inv.reserved, inv.total, inv.version), (15, 2, 17, 5));
}

#[tokio::test]
async fn invalid_transitions_are_rejected() {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;

    let response = app
        .state
        .services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 1))
        .await
        .expect("reserve");
    let engine = &app.state.services.inventory;

    // consume before confirm
    assert_matches!(
        engine.consume_reservation(response.reservation_id).await,
        Err(ServiceError::InvalidReservationStatus { .. })
    );

    // order mismatch on confirm
    assert_matches!(
        engine
            .confirm_reservation(response.reservation_id, "ORDER-2")
            .await,
        Err(ServiceError::Business(_))
    );

    engine
        .confirm_reservation(response.reservation_id, "ORDER-1")
        .await
        .expect("confirm");
    engine
        .consume_reservation(response.reservation_id)
        .await
        .expect("consume");

    // consumed is terminal
    assert_matches!(
        engine.cancel_reservation(response.reservation_id).await,
        Err(ServiceError::InvalidReservationStatus { .. })
    );
    assert_matches!(
        engine
            .confirm_reservation(response.reservation_id, "ORDER-1")
            .await,
        Err(ServiceError::InvalidReservationStatus { .. })
    );

    // unknown id
    assert_matches!(
        engine.confirm_reservation(Uuid::new_v4(), "ORDER-1").await,
        Err(ServiceError::ReservationNotFound(_))
    );
}

#[derive(Clone, Copy, Debug)]
enum Terminal {
    Cancelled,
    Consumed,
    Expired,
}

/// Whatever terminal state a reservation lands in, no further transition
/// may move it, and the ledger invariant holds afterwards.
#[rstest]
#[case::cancelled(Terminal::Cancelled)]
#[case::consumed(Terminal::Consumed)]
#[case::expired(Terminal::Expired)]
#[tokio::test]
async fn terminal_states_reject_all_transitions(#[case] terminal: Terminal) {
    let app = common::spawn_app().await;
    let (product_id, store_id) = app.seed_inventory(5, 0, 1).await;
    let engine = app.state.services.inventory.clone();

    let response = engine
        .reserve_stock(reserve_request(product_id, store_id, 2))
        .await
        .expect("reserve");
    let id = response.reservation_id;

    match terminal {
        Terminal::Cancelled => engine.cancel_reservation(id).await.expect("cancel"),
        Terminal::Consumed => {
            engine.confirm_reservation(id, "ORDER-1").await.expect("confirm");
            engine.consume_reservation(id).await.expect("consume");
        }
        Terminal::Expired => {
            app.set_reservation_deadline(id, Utc::now() - ChronoDuration::seconds(1))
                .await;
            assert!(engine.expire_reservation(id).await.expect("expire"));
        }
    }

    assert!(app.reservation(id).await.status().expect("status").is_terminal());

    assert_matches!(
        engine.confirm_reservation(id, "ORDER-1").await,
        Err(ServiceError::InvalidReservationStatus { .. })
    );
    assert_matches!(
        engine.consume_reservation(id).await,
        Err(ServiceError::InvalidReservationStatus { .. })
    );
    assert_matches!(
        engine.cancel_reservation(id).await,
        Err(ServiceError::InvalidReservationStatus { .. })
    );
    // expire is an idempotent no-op on anything that is not PENDING
    assert!(!engine.expire_reservation(id).await.expect("expire no-op"));

    let inv = app.inventory(product_id, store_id).await;
    assert_eq!(inv.total, inv.available + inv.reserved);
    assert!(inv.available >= 0 && inv.reserved >= 0 && inv.total >= 0);
}

struct FailingEventBus;

#[async_trait]
impl EventBus for FailingEventBus {
    async fn publish(&self, _topic: &str, _envelope: &EventEnvelope) -> Result<(), EventBusError> {
        Err(EventBusError::Backend("broker offline".to_string()))
    }

    async fn healthcheck(&self) -> Result<(), EventBusError> {
        Err(EventBusError::Backend("broker offline".to_string()))
    }
}

#[tokio::test]
async fn publish_failure_does_not_change_commit_outcome() {
    let config = common::test_config();
    let database = Arc::new(
        db::establish_connection(&config)
            .await
            .expect("database connection"),
    );
    db::init_schema(&database).await.expect("schema init");

    let publisher = EventPublisher::new(
        Arc::new(FailingEventBus),
        database.clone(),
        config.event_topic.clone(),
    );
    let lock = Arc::new(MemoryLockManager::new());
    let services = AppServices::new(
        database.clone(),
        lock as Arc<dyn LockManager>,
        publisher,
        &config,
    );

    let (product_id, store_id) = common::seed_catalog(&database).await;
    common::seed_inventory_row(&database, product_id, store_id, 5, 0, 1).await;

    let response = services
        .inventory
        .reserve_stock(reserve_request(product_id, store_id, 3))
        .await
        .expect("reserve succeeds despite broker failure");
    assert_eq!(response.status, ReservationStatus::Pending);

    let inv = db::find_inventory(&*database, product_id, store_id)
        .await
        .expect("query")
        .expect("row");
    assert_eq!((inv.available, inv.reserved, inv.total, inv.version), (2, 3, 5, 2));
}
