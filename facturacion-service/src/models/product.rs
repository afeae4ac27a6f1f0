use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Product master record with the live stock quantity.
///
/// `stock` only moves through the stock ledger; no ledger operation may
/// commit a negative value.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub stock: Decimal,
    pub min_stock: Decimal,
    pub unit_price: Decimal,
    pub unit_cost: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl Product {
    pub fn is_below_minimum(&self) -> bool {
        self.stock <= self.min_stock
    }
}
