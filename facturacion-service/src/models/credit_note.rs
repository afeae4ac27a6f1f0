use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Credit note against one original invoice. Carries its own NCF (B04
/// series) plus snapshots of the original document and client identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditNote {
    pub credit_note_id: Uuid,
    pub credit_note_number: String,
    pub ncf: String,
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub invoice_ncf: Option<String>,
    pub client_id: Uuid,
    pub client_name: String,
    pub client_rnc: Option<String>,
    pub issue_date: NaiveDate,
    pub reason: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: Option<DateTime<Utc>>,
}

/// One credited line. Derived from, but stored independently of, the
/// original invoice item; the credited quantity may never exceed what the
/// invoice sold.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditNoteItem {
    pub item_id: Uuid,
    pub credit_note_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_pct: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
}
