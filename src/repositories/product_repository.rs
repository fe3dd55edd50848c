use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::product;
use crate::models::product::ProductStock;

/// Persistence accessor for product stock columns.
///
/// Every stock mutation is a single conditional `UPDATE`, so concurrent
/// writers are serialized by the database rather than in process.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    db: Arc<DatabaseConnection>,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a product with an opening stock level.
    pub async fn insert(
        &self,
        name: &str,
        category_id: &str,
        stock_quantity: i32,
    ) -> Result<ProductStock, DbErr> {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            category_id: Set(category_id.to_string()),
            stock_quantity: Set(stock_quantity.max(0)),
            purchase_count: Set(0),
            in_stock: Set(stock_quantity > 0),
            is_trending: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        Ok(model.into())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<ProductStock>, DbErr> {
        Ok(product::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(ProductStock::from))
    }

    pub async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ProductStock>, DbErr> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(product::Entity::find()
            .filter(product::Column::Id.is_in(ids.iter().copied()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(ProductStock::from)
            .collect())
    }

    /// Decrements stock by `quantity` only if at least that much is on hand,
    /// bumping `purchase_count` and recomputing `in_stock` in the same write.
    ///
    /// Returns false when the guard rejected the write (short or missing).
    pub async fn try_decrement(&self, id: Uuid, quantity: i32) -> Result<bool, DbErr> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(
                product::Column::PurchaseCount,
                Expr::col(product::Column::PurchaseCount).add(quantity),
            )
            .col_expr(
                product::Column::InStock,
                Expr::col(product::Column::StockQuantity).gt(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Returns `quantity` units to stock. `purchase_count` is left as is.
    pub async fn increment(&self, id: Uuid, quantity: i32) -> Result<bool, DbErr> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(quantity),
            )
            .col_expr(product::Column::InStock, Expr::value(true))
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Ids of the `limit` best sellers, ties broken by id ascending.
    /// Products that never sold are not ranked.
    pub async fn top_sellers(&self, limit: u64) -> Result<Vec<Uuid>, DbErr> {
        product::Entity::find()
            .select_only()
            .column(product::Column::Id)
            .filter(product::Column::PurchaseCount.gt(0))
            .order_by_desc(product::Column::PurchaseCount)
            .order_by_asc(product::Column::Id)
            .limit(limit)
            .into_tuple::<Uuid>()
            .all(self.db.as_ref())
            .await
    }

    /// Clears `is_trending` outside `ids`, then sets it on `ids`.
    pub async fn replace_trending(&self, ids: &[Uuid]) -> Result<(), DbErr> {
        let mut clear = product::Entity::update_many()
            .col_expr(product::Column::IsTrending, Expr::value(false))
            .filter(product::Column::IsTrending.eq(true));
        if !ids.is_empty() {
            clear = clear.filter(product::Column::Id.is_not_in(ids.iter().copied()));
        }
        clear.exec(self.db.as_ref()).await?;

        if !ids.is_empty() {
            product::Entity::update_many()
                .col_expr(product::Column::IsTrending, Expr::value(true))
                .filter(product::Column::Id.is_in(ids.iter().copied()))
                .exec(self.db.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Products currently flagged trending, best sellers first.
    pub async fn trending(&self) -> Result<Vec<ProductStock>, DbErr> {
        Ok(product::Entity::find()
            .filter(product::Column::IsTrending.eq(true))
            .order_by_desc(product::Column::PurchaseCount)
            .order_by_asc(product::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(ProductStock::from)
            .collect())
    }
}
