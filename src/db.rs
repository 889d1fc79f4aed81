//! Database connection management and ledger access helpers.
//!
//! The helpers here are generic over [`ConnectionTrait`] so the same code
//! runs inside a transaction or against the bare connection.
//! [`conditional_update_inventory`] is the only mutation path for inventory
//! counters; it is guarded by the `version` column and bumps it by exactly
//! one per affected row.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Index, TableCreateStatement};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, Schema, Set,
};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{self, inventory, reservation, reservation::ReservationStatus};

/// Connects to the configured database with pool settings applied.
pub async fn establish_connection(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(config.database_url.clone());
    opts.max_connections(config.db_max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("database connection established");
    Ok(db)
}

/// Creates tables and indexes if they do not exist yet.
///
/// The unique composite index on `(product_id, store_id)` is what guarantees
/// at most one ledger row per pair.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables: Vec<TableCreateStatement> = vec![
        schema.create_table_from_entity(entities::Product),
        schema.create_table_from_entity(entities::Store),
        schema.create_table_from_entity(entities::Inventory),
        schema.create_table_from_entity(entities::Reservation),
        schema.create_table_from_entity(entities::EventRecord),
    ];
    for stmt in tables.iter_mut() {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    let indexes = [
        Index::create()
            .name("idx_inventory_product_store")
            .table(entities::Inventory)
            .col(inventory::Column::ProductId)
            .col(inventory::Column::StoreId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_reservation_order")
            .table(entities::Reservation)
            .col(reservation::Column::OrderId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_reservation_product_store")
            .table(entities::Reservation)
            .col(reservation::Column::ProductId)
            .col(reservation::Column::StoreId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_reservation_status")
            .table(entities::Reservation)
            .col(reservation::Column::Status)
            .if_not_exists()
            .to_owned(),
    ];
    for idx in indexes {
        db.execute(backend.build(&idx)).await?;
    }

    info!("database schema initialized");
    Ok(())
}

/// Looks up the ledger row for a (product, store) pair.
pub async fn find_inventory<C>(
    conn: &C,
    product_id: Uuid,
    store_id: Uuid,
) -> Result<Option<inventory::Model>, DbErr>
where
    C: ConnectionTrait,
{
    entities::Inventory::find()
        .filter(inventory::Column::ProductId.eq(product_id))
        .filter(inventory::Column::StoreId.eq(store_id))
        .one(conn)
        .await
}

pub async fn find_reservation<C>(
    conn: &C,
    reservation_id: Uuid,
) -> Result<Option<reservation::Model>, DbErr>
where
    C: ConnectionTrait,
{
    entities::Reservation::find_by_id(reservation_id).one(conn).await
}

/// Applies counter deltas to exactly one ledger row, iff its stored
/// `version` still equals `expected_version`. Returns whether a row was
/// affected; `false` means another writer got there first.
pub async fn conditional_update_inventory<C>(
    conn: &C,
    product_id: Uuid,
    store_id: Uuid,
    expected_version: i32,
    d_available: i32,
    d_reserved: i32,
    d_total: i32,
) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let result = entities::Inventory::update_many()
        .col_expr(
            inventory::Column::Available,
            Expr::col(inventory::Column::Available).add(d_available),
        )
        .col_expr(
            inventory::Column::Reserved,
            Expr::col(inventory::Column::Reserved).add(d_reserved),
        )
        .col_expr(
            inventory::Column::Total,
            Expr::col(inventory::Column::Total).add(d_total),
        )
        .col_expr(
            inventory::Column::Version,
            Expr::col(inventory::Column::Version).add(1),
        )
        .col_expr(inventory::Column::LastUpdated, Expr::value(Utc::now()))
        .filter(inventory::Column::ProductId.eq(product_id))
        .filter(inventory::Column::StoreId.eq(store_id))
        .filter(inventory::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Inserts a new PENDING reservation row and returns it.
pub async fn insert_reservation<C>(
    conn: &C,
    order_id: &str,
    product_id: Uuid,
    store_id: Uuid,
    quantity: i32,
    expires_at: DateTime<Utc>,
) -> Result<reservation::Model, DbErr>
where
    C: ConnectionTrait,
{
    let model = reservation::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id.to_string()),
        product_id: Set(product_id),
        store_id: Set(store_id),
        quantity: Set(quantity),
        status: Set(ReservationStatus::Pending.as_str().to_string()),
        expires_at: Set(expires_at),
        created_at: Set(Utc::now()),
        confirmed_at: Set(None),
        cancelled_at: Set(None),
    };
    model.insert(conn).await
}

/// Moves a reservation from `from_status` to `new_status`, stamping
/// `confirmed_at` or `cancelled_at` where the lifecycle records them.
///
/// The update is conditional on the stored status still being
/// `from_status`; `false` means another writer transitioned the row first.
/// This is what keeps terminal states terminal even for callers that do
/// not hold the distributed lock.
pub async fn transition_reservation_status<C>(
    conn: &C,
    reservation_id: Uuid,
    from_status: ReservationStatus,
    new_status: ReservationStatus,
    now: DateTime<Utc>,
) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let mut update = entities::Reservation::update_many()
        .col_expr(
            reservation::Column::Status,
            Expr::value(new_status.as_str()),
        )
        .filter(reservation::Column::Id.eq(reservation_id))
        .filter(reservation::Column::Status.eq(from_status.as_str()));

    match new_status {
        ReservationStatus::Confirmed => {
            update = update.col_expr(reservation::Column::ConfirmedAt, Expr::value(Some(now)));
        }
        ReservationStatus::Cancelled => {
            update = update.col_expr(reservation::Column::CancelledAt, Expr::value(Some(now)));
        }
        _ => {}
    }

    let result = update.exec(conn).await?;
    Ok(result.rows_affected == 1)
}
