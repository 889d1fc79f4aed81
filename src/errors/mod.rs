use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Wire format of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Business-level outcomes of engine operations. Each variant carries a
/// stable error code string that clients can branch on; the HTTP mapping
/// happens only at the adapter boundary via [`ApiError`].
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Insufficient stock available. Available: {available}, Requested: {requested}")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("{0}")]
    Business(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Store not found: {0}")]
    StoreNotFound(Uuid),

    #[error("Inventory not found for product {product_id} in store {store_id}")]
    InventoryNotFound { product_id: Uuid, store_id: Uuid },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),

    #[error("Reservation {0} has expired")]
    ReservationExpired(Uuid),

    #[error("Invalid reservation status for {reservation_id}. Current: {current}, Expected: {expected}")]
    InvalidReservationStatus {
        reservation_id: Uuid,
        current: String,
        expected: &'static str,
    },

    #[error("Optimistic lock conflict on {0}. Resource was modified by another operation")]
    OptimisticLockConflict(String),

    #[error("Could not acquire distributed lock: {0}")]
    LockUnavailable(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            ServiceError::Business(_) => "BUSINESS_ERROR",
            ServiceError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            ServiceError::StoreNotFound(_) => "STORE_NOT_FOUND",
            ServiceError::InventoryNotFound { .. } => "INVENTORY_NOT_FOUND",
            ServiceError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            ServiceError::ReservationExpired(_) => "RESERVATION_EXPIRED",
            ServiceError::InvalidReservationStatus { .. } => "INVALID_RESERVATION_STATUS",
            ServiceError::OptimisticLockConflict(_) => "OPTIMISTIC_LOCK_CONFLICT",
            ServiceError::LockUnavailable(_) => "DISTRIBUTED_LOCK_FAILED",
            ServiceError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            ServiceError::Database(_) | ServiceError::Internal(_) => "SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InsufficientStock { .. } | ServiceError::Business(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::ProductNotFound(_)
            | ServiceError::StoreNotFound(_)
            | ServiceError::InventoryNotFound { .. }
            | ServiceError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ReservationExpired(_)
            | ServiceError::InvalidReservationStatus { .. }
            | ServiceError::OptimisticLockConflict(_) => StatusCode::CONFLICT,
            ServiceError::LockUnavailable(_) | ServiceError::ExternalService(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// HTTP-facing error. Everything the router returns goes through this type
/// so the wire format stays uniform: `{"error": {"code", "message"}}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            ApiError::Service(err) => (err.status_code(), err.error_code(), err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(code = code, "request failed: {}", message);
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        ApiError::Service(ServiceError::Database(err))
    }
}
