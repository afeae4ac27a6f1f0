//! Request/response shapes for the HTTP surface.
//!
//! Mutating requests are validated here, before any transaction starts:
//! string shape through the `validator` derive, decimal ranges through the
//! explicit checks in each request's `validate_request`. Ledger mutations
//! answer with [`MutationResponse`]: domain failures are reported through
//! the envelope, infrastructure failures as HTTP errors.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::{CreditNote, CreditNoteItem, Invoice, InvoiceItem, Payment};

/// Uniform result shape for ledger-mutating operations.
#[derive(Debug, Serialize)]
pub struct MutationResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> MutationResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

fn check_positive(value: Decimal, field: &str) -> Result<(), AppError> {
    if value <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(())
}

fn check_non_negative(value: Decimal, field: &str) -> Result<(), AppError> {
    if value < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must not be negative",
            field
        )));
    }
    Ok(())
}

fn check_percentage(value: Decimal, field: &str) -> Result<(), AppError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be between 0 and 100",
            field
        )));
    }
    Ok(())
}

fn default_tax_rate() -> Decimal {
    // ITBIS.
    Decimal::new(18, 2)
}

fn default_fiscal_type() -> String {
    "B02".to_string()
}

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvoiceItemRequest {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_pct: Decimal,
}

impl InvoiceItemRequest {
    fn check(&self) -> Result<(), AppError> {
        check_positive(self.quantity, "item quantity")?;
        check_non_negative(self.unit_price, "item unit price")?;
        check_percentage(self.discount_pct, "item discount")
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub client_id: Uuid,
    /// NCF series ("B01", "B02", "B14", "B15") or "SIN" for documents
    /// without a fiscal number.
    #[serde(default = "default_fiscal_type")]
    pub fiscal_type: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub discount_pct: Decimal,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "invoice needs at least one item"))]
    pub items: Vec<InvoiceItemRequest>,
}

impl CreateInvoiceRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        check_percentage(self.discount_pct, "discount")?;
        check_non_negative(self.tax_rate, "tax rate")?;
        for item in &self.items {
            item.check()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub client_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub discount_pct: Decimal,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "invoice needs at least one item"))]
    pub items: Vec<InvoiceItemRequest>,
}

impl UpdateInvoiceRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        check_percentage(self.discount_pct, "discount")?;
        check_non_negative(self.tax_rate, "tax rate")?;
        for item in &self.items {
            item.check()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InvoiceListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
}

/// List row: the stored header plus the read-time status.
#[derive(Debug, Serialize)]
pub struct InvoiceSummary {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub display_status: String,
}

/// Invoice header plus its lines, as returned by mutations.
#[derive(Debug, Serialize)]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    /// Read-time status; "Vencida" when pending past due.
    pub display_status: String,
}

/// Full invoice view with linked payments and credit notes.
#[derive(Debug, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
    pub credit_notes: Vec<CreditNote>,
    pub display_status: String,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub method: String,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl CreatePaymentRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        check_positive(self.amount, "payment amount")
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePaymentRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub method: String,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl UpdatePaymentRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        check_positive(self.amount, "payment amount")
    }
}

// ---------------------------------------------------------------------------
// Credit notes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreditNoteItemRequest {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_pct: Decimal,
}

impl CreditNoteItemRequest {
    fn check(&self) -> Result<(), AppError> {
        check_positive(self.quantity, "credited quantity")?;
        check_non_negative(self.unit_price, "credited unit price")?;
        check_percentage(self.discount_pct, "credited discount")
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCreditNoteRequest {
    pub invoice_id: Uuid,
    #[validate(length(min = 1, message = "reason is required"))]
    pub reason: String,
    pub issue_date: NaiveDate,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "credit note needs at least one item"))]
    pub items: Vec<CreditNoteItemRequest>,
}

impl CreateCreditNoteRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        for item in &self.items {
            item.check()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateCreditNoteRequest {
    #[validate(length(min = 1, message = "reason is required"))]
    pub reason: String,
    pub issue_date: NaiveDate,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "credit note needs at least one item"))]
    pub items: Vec<CreditNoteItemRequest>,
}

impl UpdateCreditNoteRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        for item in &self.items {
            item.check()?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct CreditNoteWithItems {
    #[serde(flatten)]
    pub credit_note: CreditNote,
    pub items: Vec<CreditNoteItem>,
}

// ---------------------------------------------------------------------------
// Master data & inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub stock: Decimal,
    #[serde(default)]
    pub min_stock: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub unit_cost: Decimal,
}

impl CreateProductRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        check_non_negative(self.stock, "stock")?;
        check_non_negative(self.min_stock, "minimum stock")?;
        check_non_negative(self.unit_price, "unit price")?;
        check_non_negative(self.unit_cost, "unit cost")
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub min_stock: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
}

impl UpdateProductRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        for (value, field) in [
            (self.min_stock, "minimum stock"),
            (self.unit_price, "unit price"),
            (self.unit_cost, "unit cost"),
        ] {
            if let Some(value) = value {
                check_non_negative(value, field)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub rnc: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Manual stock adjustment (restock, correction) with its audit movement.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StockAdjustmentRequest {
    pub product_id: Uuid,
    /// "ENTRADA", "SALIDA" or "AJUSTE". For AJUSTE the quantity is the
    /// corrected absolute count, not a delta.
    #[validate(length(min = 1, max = 10))]
    pub movement_type: String,
    pub quantity: Decimal,
    pub movement_date: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl StockAdjustmentRequest {
    pub fn validate_request(&self) -> Result<(), AppError> {
        self.validate()?;
        check_non_negative(self.quantity, "quantity")
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MovementListQuery {
    pub product_id: Option<Uuid>,
    pub reference: Option<String>,
}

/// Outcome of the reconciliation sweep.
#[derive(Debug, Serialize)]
pub struct ReconcileSummary {
    pub invoices_checked: u64,
    pub invoices_repaired: u64,
}
