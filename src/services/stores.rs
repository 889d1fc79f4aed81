//! Read-only store queries. The catalog is a lookup the engine consults but
//! never mutates.

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{self, inventory, store};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreView {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub zip_code: String,
    pub status: String,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<store::Model> for StoreView {
    fn from(model: store::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            address: model.address,
            city: model.city,
            country: model.country,
            zip_code: model.zip_code,
            status: model.status,
            timezone: model.timezone,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// One ledger row as seen from a store's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreInventoryView {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub available: i32,
    pub reserved: i32,
    pub total: i32,
    pub last_updated: DateTime<Utc>,
    pub sync_version: i32,
}

#[derive(Clone)]
pub struct StoreService {
    db: Arc<DatabaseConnection>,
}

impl StoreService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_all_stores(&self) -> Result<Vec<StoreView>, ServiceError> {
        let models = entities::Store::find().all(&*self.db).await?;
        Ok(models.into_iter().map(StoreView::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_store(&self, store_id: Uuid) -> Result<Option<StoreView>, ServiceError> {
        let model = entities::Store::find_by_id(store_id).one(&*self.db).await?;
        Ok(model.map(StoreView::from))
    }

    /// Lists the ledger rows for one store; the store itself must exist.
    #[instrument(skip(self))]
    pub async fn get_store_inventory(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<StoreInventoryView>, ServiceError> {
        if self.get_store(store_id).await?.is_none() {
            return Err(ServiceError::StoreNotFound(store_id));
        }

        let models = entities::Inventory::find()
            .filter(inventory::Column::StoreId.eq(store_id))
            .all(&*self.db)
            .await?;

        Ok(models
            .into_iter()
            .map(|inv| StoreInventoryView {
                store_id: inv.store_id,
                product_id: inv.product_id,
                available: inv.available,
                reserved: inv.reserved,
                total: inv.total,
                last_updated: inv.last_updated,
                sync_version: inv.version,
            })
            .collect())
    }
}
