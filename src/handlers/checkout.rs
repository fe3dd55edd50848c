use axum::{extract::State, response::Response, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, validate_input};
use crate::handlers::AppState;
use crate::models::{CartLine, Order};
use crate::services::CheckoutRequest;

/// Checkout request body. The principal comes from the bearer token.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    #[validate(length(min = 1, max = 100))]
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub voucher_code: Option<String>,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, max = 64))]
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub discount_amount: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl From<Order> for CheckoutResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            subtotal: order.subtotal,
            shipping_fee: order.shipping_fee,
            discount_amount: order.discount_amount,
            total: order.total,
            currency: order.currency,
            status: order.status,
            payment_status: order.payment_status,
        }
    }
}

/// `POST /checkout`
#[instrument(skip(state, body), fields(user_id = %user.user_id))]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> Result<Response, ServiceError> {
    validate_input(&body)?;

    let order = state
        .processor
        .checkout(CheckoutRequest {
            user_id: user.user_id,
            lines: body.lines,
            voucher_code: body.voucher_code,
            payment_method: body.payment_method,
            country: body.country,
        })
        .await?;

    Ok(created_response(CheckoutResponse::from(order)))
}
