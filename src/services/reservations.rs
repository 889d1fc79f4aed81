//! Reservation queries and the expiry sweeper.
//!
//! Expiry is detected lazily by the engine when a stale PENDING hold is
//! touched; the sweeper bounds the window in which an untouched expired
//! hold still pins `reserved` stock.

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{self, reservation, reservation::ReservationStatus};
use crate::errors::ServiceError;
use crate::services::inventory::InventoryService;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReservationView {
    pub id: Uuid,
    pub order_id: String,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
}

impl From<reservation::Model> for ReservationView {
    fn from(model: reservation::Model) -> Self {
        let is_expired = model.is_expired(Utc::now());
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            store_id: model.store_id,
            quantity: model.quantity,
            status: model.status,
            expires_at: model.expires_at,
            created_at: model.created_at,
            confirmed_at: model.confirmed_at,
            cancelled_at: model.cancelled_at,
            is_expired,
        }
    }
}

/// Result of one sweep over stale PENDING reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// Reservations moved to EXPIRED with their stock released.
    pub expired_count: u64,
    /// Candidates that had already left PENDING (or failed) by the time the
    /// sweeper reached them.
    pub skipped_count: u64,
    pub swept_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    engine: InventoryService,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>, engine: InventoryService) -> Self {
        Self { db, engine }
    }

    #[instrument(skip(self))]
    pub async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<ReservationView>, ServiceError> {
        let model = entities::Reservation::find_by_id(reservation_id)
            .one(&*self.db)
            .await?;
        Ok(model.map(ReservationView::from))
    }

    /// Expires every PENDING reservation whose deadline has passed, driving
    /// each through the engine so stock release stays under the
    /// (product, store) lock and events are emitted uniformly.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepOutcome, ServiceError> {
        let now = Utc::now();

        let candidates = entities::Reservation::find()
            .filter(reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
            .filter(reservation::Column::ExpiresAt.lt(now))
            .all(&*self.db)
            .await?;

        let mut expired_count = 0u64;
        let mut skipped_count = 0u64;

        for candidate in candidates {
            match self.engine.expire_reservation(candidate.id).await {
                Ok(true) => {
                    expired_count += 1;
                    info!(
                        reservation_id = %candidate.id,
                        product_id = %candidate.product_id,
                        "marked reservation as expired"
                    );
                }
                Ok(false) => skipped_count += 1,
                Err(e) => {
                    warn!(
                        reservation_id = %candidate.id,
                        error = %e,
                        "failed to expire reservation"
                    );
                    skipped_count += 1;
                }
            }
        }

        Ok(SweepOutcome {
            expired_count,
            skipped_count,
            swept_at: now,
        })
    }
}

/// Runs the sweeper on a fixed interval until the process exits.
pub fn spawn_sweeper(service: ReservationService, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.sweep_expired().await {
                Ok(outcome) if outcome.expired_count > 0 => {
                    info!(
                        expired_count = outcome.expired_count,
                        skipped_count = outcome.skipped_count,
                        "expired reservation sweep completed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "expired reservation sweep failed"),
            }
        }
    })
}
