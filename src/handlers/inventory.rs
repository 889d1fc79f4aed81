//! HTTP surface of the reservation engine.

use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ApiError, ErrorResponse, ServiceError};
use crate::handlers::common::{success_response, validate_input, MessageResponse};
use crate::services::inventory::{
    InventoryView, ProductView, ReservationRequest, ReservationResponse, StockLevel, StockUpdate,
};
use crate::AppState;

const DEFAULT_ADJUSTMENT_REASON: &str = "manual_adjustment";

lazy_static! {
    static ref ORDER_ID_RE: Regex = Regex::new(r"^[A-Z0-9-_]{1,50}$").expect("valid regex");
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct ReserveStockRequest {
    /// Client order reference, uppercase alphanumeric with `-`/`_`
    #[validate(regex = "ORDER_ID_RE")]
    pub order_id: String,
    pub product_id: Uuid,
    pub store_id: Uuid,
    /// Quantity to hold (1-100)
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
    /// Hold time-to-live in minutes (1-60); configured default when absent
    #[validate(range(min = 1, max = 60))]
    pub ttl_minutes: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct ConfirmReservationRequest {
    pub reservation_id: Uuid,
    /// Must match the order the reservation was placed for
    #[validate(regex = "ORDER_ID_RE")]
    pub order_id: String,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct ConsumeReservationRequest {
    pub reservation_id: Uuid,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StockOperation {
    Add,
    Subtract,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateStockRequest {
    pub product_id: Uuid,
    pub store_id: Uuid,
    /// Units to add or subtract (1-1000)
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    pub operation: StockOperation,
    #[validate(length(min = 1, max = 200))]
    pub reason: Option<String>,
    pub reference_id: Option<String>,
}

pub fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/reserve", post(reserve_stock))
        .route("/confirm", post(confirm_reservation))
        .route("/consume", post(consume_reservation))
        .route("/cancel/:reservation_id", post(cancel_reservation))
        .route("/update-stock", post(update_stock))
        .route("/stock/:product_id/:store_id", get(get_stock_level))
        .route("/all", get(get_all_inventory))
        .route("/products", get(get_all_products))
}

/// Place a time-bounded hold on stock
#[utoipa::path(
    post,
    path = "/inventory/reserve",
    request_body = ReserveStockRequest,
    responses(
        (status = 200, description = "Stock reserved", body = ReservationResponse),
        (status = 400, description = "Insufficient stock or business rule violation", body = ErrorResponse),
        (status = 404, description = "Inventory not found", body = ErrorResponse),
        (status = 409, description = "Optimistic lock conflict", body = ErrorResponse),
        (status = 503, description = "Distributed lock unavailable", body = ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn reserve_stock(
    State(state): State<AppState>,
    Json(request): Json<ReserveStockRequest>,
) -> Result<Response, ApiError> {
    validate_input(&request)?;

    let response = state
        .services
        .inventory
        .reserve_stock(ReservationRequest {
            order_id: request.order_id,
            product_id: request.product_id,
            store_id: request.store_id,
            quantity: request.quantity,
            ttl_minutes: request.ttl_minutes,
        })
        .await?;

    Ok(success_response(response))
}

/// Confirm a pending reservation
#[utoipa::path(
    post,
    path = "/inventory/confirm",
    request_body = ConfirmReservationRequest,
    responses(
        (status = 200, description = "Reservation confirmed", body = MessageResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
        (status = 409, description = "Invalid status or reservation expired", body = ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn confirm_reservation(
    State(state): State<AppState>,
    Json(request): Json<ConfirmReservationRequest>,
) -> Result<Response, ApiError> {
    validate_input(&request)?;

    state
        .services
        .inventory
        .confirm_reservation(request.reservation_id, &request.order_id)
        .await?;

    Ok(success_response(MessageResponse::new(
        "Reservation confirmed successfully",
    )))
}

/// Consume a confirmed reservation, decrementing real stock
#[utoipa::path(
    post,
    path = "/inventory/consume",
    request_body = ConsumeReservationRequest,
    responses(
        (status = 200, description = "Reservation consumed", body = MessageResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
        (status = 409, description = "Invalid status or optimistic lock conflict", body = ErrorResponse),
        (status = 503, description = "Distributed lock unavailable", body = ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn consume_reservation(
    State(state): State<AppState>,
    Json(request): Json<ConsumeReservationRequest>,
) -> Result<Response, ApiError> {
    validate_input(&request)?;

    state
        .services
        .inventory
        .consume_reservation(request.reservation_id)
        .await?;

    Ok(success_response(MessageResponse::new(
        "Reservation consumed successfully - stock updated",
    )))
}

/// Cancel a pending or confirmed reservation, releasing its hold
#[utoipa::path(
    post,
    path = "/inventory/cancel/{reservation_id}",
    params(("reservation_id" = Uuid, Path, description = "Reservation to cancel")),
    responses(
        (status = 200, description = "Reservation cancelled", body = MessageResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
        (status = 409, description = "Invalid status or optimistic lock conflict", body = ErrorResponse),
        (status = 503, description = "Distributed lock unavailable", body = ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state
        .services
        .inventory
        .cancel_reservation(reservation_id)
        .await?;

    Ok(success_response(MessageResponse::new(
        "Reservation cancelled successfully",
    )))
}

/// Administrative stock adjustment (stock-in, write-off)
#[utoipa::path(
    post,
    path = "/inventory/update-stock",
    request_body = UpdateStockRequest,
    responses(
        (status = 200, description = "Stock updated", body = MessageResponse),
        (status = 400, description = "Stock cannot go below zero", body = ErrorResponse),
        (status = 404, description = "Inventory not found", body = ErrorResponse),
        (status = 409, description = "Optimistic lock conflict", body = ErrorResponse),
        (status = 503, description = "Distributed lock unavailable", body = ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn update_stock(
    State(state): State<AppState>,
    Json(request): Json<UpdateStockRequest>,
) -> Result<Response, ApiError> {
    validate_input(&request)?;

    let quantity_change = match request.operation {
        StockOperation::Add => request.quantity,
        StockOperation::Subtract => -request.quantity,
    };

    state
        .services
        .inventory
        .update_stock(StockUpdate {
            product_id: request.product_id,
            store_id: request.store_id,
            quantity_change,
            reason: request
                .reason
                .unwrap_or_else(|| DEFAULT_ADJUSTMENT_REASON.to_string()),
            reference_id: request.reference_id,
        })
        .await?;

    Ok(success_response(MessageResponse::new(
        "Stock updated successfully",
    )))
}

/// Point query for the stock level of one (product, store) pair
#[utoipa::path(
    get,
    path = "/inventory/stock/{product_id}/{store_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product"),
        ("store_id" = Uuid, Path, description = "Store")
    ),
    responses(
        (status = 200, description = "Current stock level", body = StockLevel),
        (status = 404, description = "Inventory not found", body = ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn get_stock_level(
    State(state): State<AppState>,
    Path((product_id, store_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    let stock_level = state
        .services
        .inventory
        .get_stock_level(product_id, store_id)
        .await?
        .ok_or(ServiceError::InventoryNotFound {
            product_id,
            store_id,
        })?;

    Ok(success_response(stock_level))
}

/// List every ledger row
#[utoipa::path(
    get,
    path = "/inventory/all",
    responses((status = 200, description = "All inventory records", body = [InventoryView])),
    tag = "Inventory"
)]
pub async fn get_all_inventory(State(state): State<AppState>) -> Result<Response, ApiError> {
    let inventory = state.services.inventory.get_all_inventory().await?;
    Ok(success_response(inventory))
}

/// List the product catalog
#[utoipa::path(
    get,
    path = "/inventory/products",
    responses((status = 200, description = "All products", body = [ProductView])),
    tag = "Inventory"
)]
pub async fn get_all_products(State(state): State<AppState>) -> Result<Response, ApiError> {
    let products = state.services.inventory.get_all_products().await?;
    Ok(success_response(products))
}
