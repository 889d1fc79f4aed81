//! Read-only store endpoints.

use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::errors::{ApiError, ErrorResponse, ServiceError};
use crate::handlers::common::success_response;
use crate::services::stores::{StoreInventoryView, StoreView};
use crate::AppState;

pub fn stores_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_all_stores))
        .route("/:store_id", get(get_store))
        .route("/:store_id/inventory", get(get_store_inventory))
}

/// List all stores
#[utoipa::path(
    get,
    path = "/stores",
    responses((status = 200, description = "All stores", body = [StoreView])),
    tag = "Stores"
)]
pub async fn get_all_stores(State(state): State<AppState>) -> Result<Response, ApiError> {
    let stores = state.services.stores.get_all_stores().await?;
    Ok(success_response(stores))
}

/// Fetch one store
#[utoipa::path(
    get,
    path = "/stores/{store_id}",
    params(("store_id" = Uuid, Path, description = "Store")),
    responses(
        (status = 200, description = "Store", body = StoreView),
        (status = 404, description = "Store not found", body = ErrorResponse)
    ),
    tag = "Stores"
)]
pub async fn get_store(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let store = state
        .services
        .stores
        .get_store(store_id)
        .await?
        .ok_or(ServiceError::StoreNotFound(store_id))?;

    Ok(success_response(store))
}

/// List the inventory ledger rows of one store
#[utoipa::path(
    get,
    path = "/stores/{store_id}/inventory",
    params(("store_id" = Uuid, Path, description = "Store")),
    responses(
        (status = 200, description = "Store inventory", body = [StoreInventoryView]),
        (status = 404, description = "Store not found", body = ErrorResponse)
    ),
    tag = "Stores"
)]
pub async fn get_store_inventory(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let inventory = state.services.stores.get_store_inventory(store_id).await?;
    Ok(success_response(inventory))
}
