use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every HTTP endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Unprocessable Entity")
    pub error: String,
    /// Stable machine-readable reason, e.g. `voucher_below_minimum`
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// RFC 3339 timestamp of the failure
    pub timestamp: String,
}

/// Why a voucher cannot be applied. These are expected, user-facing outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VoucherError {
    #[error("voucher not found")]
    NotFound,

    #[error("voucher is deactivated")]
    Deactivated,

    #[error("voucher is not valid before {starts_at}")]
    NotYetValid { starts_at: DateTime<Utc> },

    #[error("voucher expired at {ended_at}")]
    Expired { ended_at: DateTime<Utc> },

    #[error("voucher usage limit reached")]
    LimitReached,

    #[error("subtotal {subtotal} is below the voucher minimum of {minimum}")]
    BelowMinimum { minimum: i64, subtotal: i64 },

    #[error("no product in the cart is eligible for this voucher")]
    ProductNotEligible,

    #[error("no product category in the cart is eligible for this voucher")]
    CategoryNotEligible,
}

impl VoucherError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "voucher_not_found",
            Self::Deactivated => "voucher_deactivated",
            Self::NotYetValid { .. } => "voucher_not_yet_valid",
            Self::Expired { .. } => "voucher_expired",
            Self::LimitReached => "voucher_limit_reached",
            Self::BelowMinimum { .. } => "voucher_below_minimum",
            Self::ProductNotEligible => "voucher_product_not_eligible",
            Self::CategoryNotEligible => "voucher_category_not_eligible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StockError {
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("unknown product {product_id}")]
    UnknownProduct { product_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway timed out")]
    Timeout,

    #[error("payment gateway returned no confirmation reference")]
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
pub enum PersistenceError {
    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<DbErr> for PersistenceError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => Self::Unavailable(err.to_string()),
            other => Self::WriteConflict(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error(transparent)]
    Voucher(#[from] VoucherError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Order {order_id} is partially reserved: {reason}")]
    PartiallyReserved { order_id: Uuid, reason: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        ServiceError::Persistence(err.into())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Voucher(VoucherError::NotFound) => StatusCode::NOT_FOUND,
            Self::Voucher(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Stock(StockError::InsufficientStock { .. }) => StatusCode::CONFLICT,
            Self::Stock(StockError::UnknownProduct { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Payment(PaymentError::GatewayUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Payment(PaymentError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Self::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Persistence(PersistenceError::WriteConflict(_)) => StatusCode::CONFLICT,
            Self::Persistence(PersistenceError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PartiallyReserved { .. } | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable reason surfaced to the UI collaborator.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Voucher(err) => err.code(),
            Self::Stock(StockError::InsufficientStock { .. }) => "insufficient_stock",
            Self::Stock(StockError::UnknownProduct { .. }) => "unknown_product",
            Self::Payment(PaymentError::Declined(_)) => "payment_declined",
            Self::Payment(PaymentError::GatewayUnavailable(_)) => "payment_gateway_unavailable",
            Self::Payment(PaymentError::Timeout) => "payment_timeout",
            Self::Payment(PaymentError::Unconfirmed) => "payment_unconfirmed",
            Self::Persistence(PersistenceError::WriteConflict(_)) => "write_conflict",
            Self::Persistence(PersistenceError::Unavailable(_)) => "storage_unavailable",
            Self::ValidationError(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::PartiallyReserved { .. } => "partially_reserved",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage and internal failures return generic messages.
    pub fn response_message(&self) -> String {
        match self {
            Self::Persistence(PersistenceError::WriteConflict(_)) => {
                "The request conflicted with a concurrent update".to_string()
            }
            Self::Persistence(PersistenceError::Unavailable(_)) => {
                "Storage temporarily unavailable".to_string()
            }
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::PartiallyReserved { order_id, .. } => {
                format!("Order {order_id} could not be fully rolled back and needs review")
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
