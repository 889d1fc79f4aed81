//! The reservation engine: every stock-mutating operation and the point
//! queries that bypass the lock.
//!
//! Write paths follow one discipline: acquire the (product, store) lock,
//! run the critical section in a transaction, commit, publish the event,
//! release the lock on every exit. The database version check stays the
//! arbiter of record; the lock only serializes the read-then-write window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::entities::{self, inventory, product, reservation::ReservationStatus};
use crate::errors::ServiceError;
use crate::events::EventPublisher;
use crate::lock::{inventory_lock_key, LockManager};
use crate::metrics;

/// Attempts for the compensating (cancel/expire) conditional update while
/// the distributed lock is held.
const CONDITIONAL_UPDATE_ATTEMPTS: u32 = 3;

/// Input for [`InventoryService::reserve_stock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub order_id: String,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    /// Falls back to the configured default when absent.
    pub ttl_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

/// Administrative stock adjustment (stock-in, write-off).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub quantity_change: i32,
    pub reason: String,
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub available: i32,
    pub reserved: i32,
    pub total: i32,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InventoryView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub available: i32,
    pub reserved: i32,
    pub total: i32,
    pub version: i32,
    pub last_updated: DateTime<Utc>,
}

impl From<inventory::Model> for InventoryView {
    fn from(model: inventory::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            store_id: model.store_id,
            available: model.available,
            reserved: model.reserved,
            total: model.total,
            version: model.version,
            last_updated: model.last_updated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    /// Major currency units; storage is minor units divided by 100.
    pub unit_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<product::Model> for ProductView {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            sku: model.sku,
            name: model.name,
            description: model.description,
            category: model.category,
            unit_price: model.unit_price_minor as f64 / 100.0,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Stateless engine over the ledger, the lock service, and the publisher.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    lock: Arc<dyn LockManager>,
    publisher: EventPublisher,
    default_ttl_minutes: i64,
    lock_ttl: Duration,
    max_quantity: i32,
}

impl InventoryService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        lock: Arc<dyn LockManager>,
        publisher: EventPublisher,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            lock,
            publisher,
            default_ttl_minutes: config.reservation_ttl_minutes,
            lock_ttl: Duration::from_secs(config.lock_ttl_seconds),
            max_quantity: config.max_reservation_quantity,
        }
    }

    /// Places a PENDING hold on stock for `ttl_minutes`.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, product_id = %request.product_id, store_id = %request.store_id))]
    pub async fn reserve_stock(
        &self,
        request: ReservationRequest,
    ) -> Result<ReservationResponse, ServiceError> {
        if request.quantity <= 0 || request.quantity > self.max_quantity {
            return Err(ServiceError::Business(format!(
                "Quantity must be between 1 and {}",
                self.max_quantity
            )));
        }

        let lock_key = inventory_lock_key(request.product_id, request.store_id);
        if !self.lock.acquire(&lock_key, self.lock_ttl).await {
            warn!(lock_key = %lock_key, "could not acquire distributed lock");
            return Err(ServiceError::LockUnavailable(lock_key));
        }

        let result = self.reserve_stock_locked(&request).await;
        self.lock.release(&lock_key).await;
        result
    }

    async fn reserve_stock_locked(
        &self,
        request: &ReservationRequest,
    ) -> Result<ReservationResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let inventory = db::find_inventory(&txn, request.product_id, request.store_id)
            .await?
            .ok_or(ServiceError::InventoryNotFound {
                product_id: request.product_id,
                store_id: request.store_id,
            })?;

        if inventory.available < request.quantity {
            return Err(ServiceError::InsufficientStock {
                available: inventory.available,
                requested: request.quantity,
            });
        }

        let ttl_minutes = request.ttl_minutes.unwrap_or(self.default_ttl_minutes);
        let expires_at = Utc::now() + ChronoDuration::minutes(ttl_minutes);

        let reservation = db::insert_reservation(
            &txn,
            &request.order_id,
            request.product_id,
            request.store_id,
            request.quantity,
            expires_at,
        )
        .await?;

        let updated = db::conditional_update_inventory(
            &txn,
            request.product_id,
            request.store_id,
            inventory.version,
            -request.quantity,
            request.quantity,
            0,
        )
        .await?;
        if !updated {
            return Err(ServiceError::OptimisticLockConflict(format!(
                "inventory:{}:{}",
                request.product_id, request.store_id
            )));
        }

        txn.commit().await?;

        metrics::record_reservation(ReservationStatus::Pending.as_str());
        metrics::set_stock_level(
            request.product_id,
            request.store_id,
            (inventory.available - request.quantity) as i64,
        );

        self.publisher
            .publish(
                "reservation_created",
                json!({
                    "reservation_id": reservation.id,
                    "order_id": request.order_id,
                    "product_id": request.product_id,
                    "store_id": request.store_id,
                    "quantity": request.quantity,
                    "expires_at": expires_at,
                }),
            )
            .await;

        info!(
            reservation_id = %reservation.id,
            quantity = request.quantity,
            "stock reserved"
        );

        Ok(ReservationResponse {
            reservation_id: reservation.id,
            status: ReservationStatus::Pending,
            expires_at,
            message: "Stock reserved successfully".to_string(),
        })
    }

    /// PENDING → CONFIRMED. No counter change: reserved stock stays
    /// reserved, only the reservation's own state advances. A hold past its
    /// deadline is expired in line and reported as such.
    #[instrument(skip(self))]
    pub async fn confirm_reservation(
        &self,
        reservation_id: Uuid,
        order_id: &str,
    ) -> Result<(), ServiceError> {
        let reservation = db::find_reservation(&*self.db, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;

        if reservation.order_id != order_id {
            return Err(ServiceError::Business(format!(
                "Order {} does not match reservation {}",
                order_id, reservation_id
            )));
        }

        let status = self.parse_status(&reservation)?;
        if status != ReservationStatus::Pending {
            return Err(ServiceError::InvalidReservationStatus {
                reservation_id,
                current: reservation.status.clone(),
                expected: "pending",
            });
        }

        let now = Utc::now();
        if reservation.is_expired(now) {
            self.expire_reservation(reservation_id).await?;
            return Err(ServiceError::ReservationExpired(reservation_id));
        }

        let txn = self.db.begin().await?;
        let transitioned = db::transition_reservation_status(
            &txn,
            reservation_id,
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            now,
        )
        .await?;
        if !transitioned {
            // A rival cancel or expire won between our read and this update.
            let current = db::find_reservation(&txn, reservation_id)
                .await?
                .map(|r| r.status)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ServiceError::InvalidReservationStatus {
                reservation_id,
                current,
                expected: "pending",
            });
        }
        txn.commit().await?;

        metrics::record_reservation(ReservationStatus::Confirmed.as_str());
        self.publisher
            .publish(
                "reservation_confirmed",
                json!({
                    "reservation_id": reservation_id,
                    "order_id": reservation.order_id,
                    "product_id": reservation.product_id,
                    "store_id": reservation.store_id,
                    "quantity": reservation.quantity,
                }),
            )
            .await;

        info!(reservation_id = %reservation_id, order_id = %reservation.order_id, "reservation confirmed");
        Ok(())
    }

    /// CONFIRMED → CONSUMED. The point where stock physically leaves the
    /// store: `reserved` and `total` drop together.
    #[instrument(skip(self))]
    pub async fn consume_reservation(&self, reservation_id: Uuid) -> Result<(), ServiceError> {
        let reservation = db::find_reservation(&*self.db, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;

        let status = self.parse_status(&reservation)?;
        if status != ReservationStatus::Confirmed {
            return Err(ServiceError::InvalidReservationStatus {
                reservation_id,
                current: reservation.status.clone(),
                expected: "confirmed",
            });
        }

        let lock_key = inventory_lock_key(reservation.product_id, reservation.store_id);
        if !self.lock.acquire(&lock_key, self.lock_ttl).await {
            warn!(lock_key = %lock_key, "could not acquire distributed lock");
            return Err(ServiceError::LockUnavailable(lock_key));
        }

        let result = self.consume_locked(reservation_id).await;
        self.lock.release(&lock_key).await;
        result
    }

    async fn consume_locked(&self, reservation_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        // Re-read under the lock: a rival cancel or expire may have won the
        // race between the pre-check and acquisition.
        let reservation = db::find_reservation(&txn, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;
        if self.parse_status(&reservation)? != ReservationStatus::Confirmed {
            return Err(ServiceError::InvalidReservationStatus {
                reservation_id,
                current: reservation.status.clone(),
                expected: "confirmed",
            });
        }

        let inventory = db::find_inventory(&txn, reservation.product_id, reservation.store_id)
            .await?
            .ok_or(ServiceError::InventoryNotFound {
                product_id: reservation.product_id,
                store_id: reservation.store_id,
            })?;

        let updated = db::conditional_update_inventory(
            &txn,
            reservation.product_id,
            reservation.store_id,
            inventory.version,
            0,
            -reservation.quantity,
            -reservation.quantity,
        )
        .await?;
        if !updated {
            return Err(ServiceError::OptimisticLockConflict(format!(
                "inventory:{}:{}",
                reservation.product_id, reservation.store_id
            )));
        }

        let transitioned = db::transition_reservation_status(
            &txn,
            reservation.id,
            ReservationStatus::Confirmed,
            ReservationStatus::Consumed,
            Utc::now(),
        )
        .await?;
        if !transitioned {
            return Err(ServiceError::OptimisticLockConflict(format!(
                "reservation:{}",
                reservation.id
            )));
        }
        txn.commit().await?;

        metrics::record_reservation(ReservationStatus::Consumed.as_str());
        metrics::set_stock_level(
            reservation.product_id,
            reservation.store_id,
            inventory.available as i64,
        );

        self.publisher
            .publish(
                "reservation_consumed",
                json!({
                    "reservation_id": reservation.id,
                    "order_id": reservation.order_id,
                    "product_id": reservation.product_id,
                    "store_id": reservation.store_id,
                    "quantity": reservation.quantity,
                }),
            )
            .await;

        info!(
            reservation_id = %reservation.id,
            order_id = %reservation.order_id,
            quantity = reservation.quantity,
            "reservation consumed; stock updated"
        );
        Ok(())
    }

    /// PENDING/CONFIRMED → CANCELLED, crediting the held quantity back to
    /// `available`.
    #[instrument(skip(self))]
    pub async fn cancel_reservation(&self, reservation_id: Uuid) -> Result<(), ServiceError> {
        let reservation = db::find_reservation(&*self.db, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;

        let status = self.parse_status(&reservation)?;
        if !matches!(
            status,
            ReservationStatus::Pending | ReservationStatus::Confirmed
        ) {
            return Err(ServiceError::InvalidReservationStatus {
                reservation_id,
                current: reservation.status.clone(),
                expected: "pending or confirmed",
            });
        }

        let lock_key = inventory_lock_key(reservation.product_id, reservation.store_id);
        if !self.lock.acquire(&lock_key, self.lock_ttl).await {
            warn!(lock_key = %lock_key, "could not acquire distributed lock");
            return Err(ServiceError::LockUnavailable(lock_key));
        }

        let result = self.cancel_locked(reservation_id).await;
        self.lock.release(&lock_key).await;
        result
    }

    async fn cancel_locked(&self, reservation_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        // Re-read under the lock: only a still-live hold releases stock.
        let reservation = db::find_reservation(&txn, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;
        let current_status = self.parse_status(&reservation)?;
        if !matches!(
            current_status,
            ReservationStatus::Pending | ReservationStatus::Confirmed
        ) {
            return Err(ServiceError::InvalidReservationStatus {
                reservation_id,
                current: reservation.status.clone(),
                expected: "pending or confirmed",
            });
        }

        let new_available = self
            .credit_reserved_with_retry(
                &txn,
                reservation.product_id,
                reservation.store_id,
                reservation.quantity,
            )
            .await?;

        let transitioned = db::transition_reservation_status(
            &txn,
            reservation.id,
            current_status,
            ReservationStatus::Cancelled,
            Utc::now(),
        )
        .await?;
        if !transitioned {
            return Err(ServiceError::OptimisticLockConflict(format!(
                "reservation:{}",
                reservation.id
            )));
        }
        txn.commit().await?;

        metrics::record_reservation(ReservationStatus::Cancelled.as_str());
        metrics::set_stock_level(
            reservation.product_id,
            reservation.store_id,
            new_available as i64,
        );

        self.publisher
            .publish(
                "reservation_cancelled",
                json!({
                    "reservation_id": reservation.id,
                    "order_id": reservation.order_id,
                    "product_id": reservation.product_id,
                    "store_id": reservation.store_id,
                    "quantity": reservation.quantity,
                }),
            )
            .await;

        info!(reservation_id = %reservation.id, order_id = %reservation.order_id, "reservation cancelled");
        Ok(())
    }

    /// PENDING → EXPIRED, releasing the held stock. Idempotent: returns
    /// `Ok(false)` without touching counters when the reservation is no
    /// longer PENDING.
    #[instrument(skip(self))]
    pub async fn expire_reservation(&self, reservation_id: Uuid) -> Result<bool, ServiceError> {
        let reservation = db::find_reservation(&*self.db, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;

        if reservation.status() != Some(ReservationStatus::Pending) {
            return Ok(false);
        }

        let lock_key = inventory_lock_key(reservation.product_id, reservation.store_id);
        if !self.lock.acquire(&lock_key, self.lock_ttl).await {
            warn!(lock_key = %lock_key, "could not acquire distributed lock");
            return Err(ServiceError::LockUnavailable(lock_key));
        }

        let result = self.expire_locked(reservation_id).await;
        self.lock.release(&lock_key).await;
        result
    }

    async fn expire_locked(&self, reservation_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        // Re-read now that the lock is held; another request may have
        // confirmed, cancelled, or expired it in the meantime.
        let reservation = db::find_reservation(&txn, reservation_id)
            .await?
            .ok_or(ServiceError::ReservationNotFound(reservation_id))?;
        if reservation.status() != Some(ReservationStatus::Pending) {
            return Ok(false);
        }

        let new_available = self
            .credit_reserved_with_retry(
                &txn,
                reservation.product_id,
                reservation.store_id,
                reservation.quantity,
            )
            .await?;

        let transitioned = db::transition_reservation_status(
            &txn,
            reservation_id,
            ReservationStatus::Pending,
            ReservationStatus::Expired,
            Utc::now(),
        )
        .await?;
        if !transitioned {
            return Err(ServiceError::OptimisticLockConflict(format!(
                "reservation:{reservation_id}"
            )));
        }
        txn.commit().await?;

        metrics::record_reservation(ReservationStatus::Expired.as_str());
        metrics::set_stock_level(
            reservation.product_id,
            reservation.store_id,
            new_available as i64,
        );

        self.publisher
            .publish(
                "reservation_expired",
                json!({
                    "reservation_id": reservation.id,
                    "order_id": reservation.order_id,
                    "product_id": reservation.product_id,
                    "store_id": reservation.store_id,
                    "quantity": reservation.quantity,
                }),
            )
            .await;

        info!(reservation_id = %reservation.id, "reservation expired; stock released");
        Ok(true)
    }

    /// Administrative adjustment of on-shelf stock.
    #[instrument(skip(self, update), fields(product_id = %update.product_id, store_id = %update.store_id))]
    pub async fn update_stock(&self, update: StockUpdate) -> Result<(), ServiceError> {
        let lock_key = inventory_lock_key(update.product_id, update.store_id);
        if !self.lock.acquire(&lock_key, self.lock_ttl).await {
            warn!(lock_key = %lock_key, "could not acquire distributed lock");
            return Err(ServiceError::LockUnavailable(lock_key));
        }

        let result = self.update_stock_locked(&update).await;
        self.lock.release(&lock_key).await;
        result
    }

    async fn update_stock_locked(&self, update: &StockUpdate) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let inventory = db::find_inventory(&txn, update.product_id, update.store_id)
            .await?
            .ok_or(ServiceError::InventoryNotFound {
                product_id: update.product_id,
                store_id: update.store_id,
            })?;

        let new_available = inventory.available + update.quantity_change;
        if new_available < 0 {
            return Err(ServiceError::Business(
                "Stock cannot go below zero".to_string(),
            ));
        }

        let updated = db::conditional_update_inventory(
            &txn,
            update.product_id,
            update.store_id,
            inventory.version,
            update.quantity_change,
            0,
            update.quantity_change,
        )
        .await?;
        if !updated {
            return Err(ServiceError::OptimisticLockConflict(format!(
                "inventory:{}:{}",
                update.product_id, update.store_id
            )));
        }

        txn.commit().await?;

        metrics::set_stock_level(update.product_id, update.store_id, new_available as i64);

        self.publisher
            .publish(
                "stock_updated",
                json!({
                    "product_id": update.product_id,
                    "store_id": update.store_id,
                    "quantity_change": update.quantity_change,
                    "previous_available": inventory.available,
                    "new_available": new_available,
                    "reason": update.reason,
                    "reference_id": update.reference_id,
                }),
            )
            .await;

        info!(
            quantity_change = update.quantity_change,
            new_available = new_available,
            "stock updated"
        );
        Ok(())
    }

    // -- read paths: no lock, no transaction --

    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<ProductView>, ServiceError> {
        let model = entities::Product::find_by_id(product_id)
            .one(&*self.db)
            .await?;
        Ok(model.map(ProductView::from))
    }

    pub async fn get_all_products(&self) -> Result<Vec<ProductView>, ServiceError> {
        let models = entities::Product::find().all(&*self.db).await?;
        Ok(models.into_iter().map(ProductView::from).collect())
    }

    pub async fn get_inventory(
        &self,
        product_id: Uuid,
        store_id: Uuid,
    ) -> Result<Option<InventoryView>, ServiceError> {
        let model = db::find_inventory(&*self.db, product_id, store_id).await?;
        Ok(model.map(InventoryView::from))
    }

    pub async fn get_all_inventory(&self) -> Result<Vec<InventoryView>, ServiceError> {
        let models = entities::Inventory::find().all(&*self.db).await?;
        Ok(models.into_iter().map(InventoryView::from).collect())
    }

    pub async fn get_stock_level(
        &self,
        product_id: Uuid,
        store_id: Uuid,
    ) -> Result<Option<StockLevel>, ServiceError> {
        let model = db::find_inventory(&*self.db, product_id, store_id).await?;
        Ok(model.map(|inv| StockLevel {
            product_id: inv.product_id,
            store_id: inv.store_id,
            available: inv.available,
            reserved: inv.reserved,
            total: inv.total,
            last_updated: inv.last_updated,
        }))
    }

    // -- internals --

    fn parse_status(
        &self,
        reservation: &crate::entities::reservation::Model,
    ) -> Result<ReservationStatus, ServiceError> {
        reservation.status().ok_or_else(|| {
            ServiceError::Internal(format!(
                "unknown reservation status '{}' for {}",
                reservation.status, reservation.id
            ))
        })
    }

    /// Credits a held quantity back to `available`. Cancelling and expiring
    /// are compensating actions the caller expects to succeed while the
    /// lock is held, so the read-then-conditional-update is retried a small
    /// number of times before surfacing a conflict.
    async fn credit_reserved_with_retry<C>(
        &self,
        conn: &C,
        product_id: Uuid,
        store_id: Uuid,
        quantity: i32,
    ) -> Result<i32, ServiceError>
    where
        C: ConnectionTrait,
    {
        for _ in 0..CONDITIONAL_UPDATE_ATTEMPTS {
            let inventory = db::find_inventory(conn, product_id, store_id)
                .await?
                .ok_or(ServiceError::InventoryNotFound {
                    product_id,
                    store_id,
                })?;

            if db::conditional_update_inventory(
                conn,
                product_id,
                store_id,
                inventory.version,
                quantity,
                -quantity,
                0,
            )
            .await?
            {
                return Ok(inventory.available + quantity);
            }
        }

        Err(ServiceError::OptimisticLockConflict(format!(
            "inventory:{product_id}:{store_id}"
        )))
    }
}
