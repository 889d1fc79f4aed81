use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger record for one (product, store) pair.
///
/// Counters satisfy `total = available + reserved` with all three
/// non-negative after every committed transition. `version` is the sole
/// authority for optimistic concurrency control; it advances by exactly one
/// on each mutating commit, and every counter mutation goes through
/// `db::conditional_update_inventory` which is guarded by it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub available: i32,
    pub reserved: i32,
    pub total: i32,
    pub version: i32,
    pub last_updated: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
