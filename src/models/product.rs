use crate::entities::product;
use serde::Serialize;
use uuid::Uuid;

/// Stock view of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductStock {
    pub id: Uuid,
    pub name: String,
    pub category_id: String,
    pub stock_quantity: i32,
    pub purchase_count: i32,
    pub in_stock: bool,
    pub is_trending: bool,
}

impl From<product::Model> for ProductStock {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            category_id: model.category_id,
            stock_quantity: model.stock_quantity,
            purchase_count: model.purchase_count,
            in_stock: model.in_stock,
            is_trending: model.is_trending,
        }
    }
}
