use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::order_item;
use crate::models::order::Order;

/// Repository for order records and their line snapshots
#[derive(Debug, Clone)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the order row and its line snapshot in one transaction
    pub async fn insert(&self, order: &Order) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order.id),
            user_id: Set(order.user_id),
            subtotal: Set(order.subtotal),
            shipping_fee: Set(order.shipping_fee),
            discount_amount: Set(order.discount_amount),
            total: Set(order.total),
            currency: Set(order.currency.clone()),
            voucher_id: Set(order.voucher_id),
            status: Set(order.status),
            payment_status: Set(order.payment_status),
            payment_method: Set(order.payment_method),
            payment_reference: Set(order.payment_reference.clone()),
            country: Set(order.country.clone()),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
        }
        .insert(&txn)
        .await?;

        for (position, line) in order.lines.iter().enumerate() {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                unit_price: Set(line.price),
                quantity: Set(line.quantity),
                color: Set(line.color.clone()),
                size: Set(line.size.clone()),
                image: Set(line.image.clone()),
                position: Set(position as i32),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await
    }

    /// Find an order owned by `user_id`
    pub async fn find_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Option<Order>, DbErr> {
        let model = order::Entity::find_by_id(id)
            .filter(order::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?;
        match model {
            Some(model) => self.with_items(model).await.map(Some),
            None => Ok(None),
        }
    }

    /// Moves a pending order to `Cancelled`, recording the final payment status.
    ///
    /// Returns false if the order was no longer pending.
    pub async fn mark_cancelled(
        &self,
        id: Uuid,
        payment_status: PaymentStatus,
    ) -> Result<bool, DbErr> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn with_items(&self, model: order::Model) -> Result<Order, DbErr> {
        let items = model
            .find_related(order_item::Entity)
            .all(self.db.as_ref())
            .await?;
        Ok(Order::from_parts(model, items))
    }
}
