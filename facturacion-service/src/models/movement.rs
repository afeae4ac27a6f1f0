use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stock movement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    Entrada,
    Salida,
    Ajuste,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entrada => "ENTRADA",
            MovementType::Salida => "SALIDA",
            MovementType::Ajuste => "AJUSTE",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "ENTRADA" => MovementType::Entrada,
            "AJUSTE" => MovementType::Ajuste,
            _ => MovementType::Salida,
        }
    }
}

/// Immutable audit-trail row for one stock change. Rows referencing a
/// document are removed only when that document is edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryMovement {
    pub movement_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub movement_type: String,
    pub quantity: Decimal,
    pub movement_date: NaiveDate,
    pub reference: String,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}
