use crate::entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus};
use crate::entities::order_item;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// One cart line as submitted at checkout. The price is the snapshot taken
/// when the item was added to the cart, not the live catalogue price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CartLine {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// Unit price in minor units
    #[validate(custom = "validate_price")]
    pub price: i64,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

fn validate_price(price: i64) -> Result<(), ValidationError> {
    if price < 0 {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

impl CartLine {
    /// `price * quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<i64> {
        self.price.checked_mul(i64::from(self.quantity))
    }
}

/// Sum of line totals, or `None` if any step overflows.
pub fn subtotal(lines: &[CartLine]) -> Option<i64> {
    lines
        .iter()
        .try_fold(0i64, |acc, line| acc.checked_add(line.line_total()?))
}

/// A persisted order with its line snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub discount_amount: i64,
    pub total: i64,
    pub currency: String,
    pub voucher_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing)]
    pub payment_reference: Option<String>,
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub(crate) fn from_parts(model: order::Model, mut items: Vec<order_item::Model>) -> Self {
        items.sort_by_key(|item| item.position);
        let lines = items
            .into_iter()
            .map(|item| CartLine {
                product_id: item.product_id,
                name: item.name,
                price: item.unit_price,
                quantity: item.quantity,
                color: item.color,
                size: item.size,
                image: item.image,
            })
            .collect();

        Self {
            id: model.id,
            user_id: model.user_id,
            lines,
            subtotal: model.subtotal,
            shipping_fee: model.shipping_fee,
            discount_amount: model.discount_amount,
            total: model.total,
            currency: model.currency,
            voucher_id: model.voucher_id,
            status: model.status,
            payment_status: model.payment_status,
            payment_method: model.payment_method,
            payment_reference: model.payment_reference,
            country: model.country,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
