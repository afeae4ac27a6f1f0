//! Invoice model and the pure ledger arithmetic: totals, fiscal document
//! types and the status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Two amounts within one cent of each other are considered equal.
pub const AMOUNT_TOLERANCE_CENTS: i64 = 1;

fn tolerance() -> Decimal {
    Decimal::new(AMOUNT_TOLERANCE_CENTS, 2)
}

/// Fiscal document type (NCF series). `SinComprobante` marks documents that
/// carry no fiscal number at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalDocType {
    /// B01 - credito fiscal (business-to-business).
    CreditoFiscal,
    /// B02 - consumidor final.
    Consumo,
    /// B04 - nota de credito.
    NotaCredito,
    /// B14 - regimenes especiales.
    RegimenEspecial,
    /// B15 - gubernamental.
    Gubernamental,
    /// Internal document without NCF.
    SinComprobante,
}

impl FiscalDocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiscalDocType::CreditoFiscal => "B01",
            FiscalDocType::Consumo => "B02",
            FiscalDocType::NotaCredito => "B04",
            FiscalDocType::RegimenEspecial => "B14",
            FiscalDocType::Gubernamental => "B15",
            FiscalDocType::SinComprobante => "SIN",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "B01" => FiscalDocType::CreditoFiscal,
            "B04" => FiscalDocType::NotaCredito,
            "B14" => FiscalDocType::RegimenEspecial,
            "B15" => FiscalDocType::Gubernamental,
            "SIN" => FiscalDocType::SinComprobante,
            _ => FiscalDocType::Consumo,
        }
    }

    /// NCF series prefix, or `None` when the type carries no fiscal number.
    pub fn series_prefix(&self) -> Option<&'static str> {
        match self {
            FiscalDocType::SinComprobante => None,
            other => Some(other.as_str()),
        }
    }
}

/// Stored invoice status. `Vencida` is intentionally absent: it is derived
/// at display time and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Pendiente,
    Parcial,
    Pagada,
    NotaCreditoParcial,
    Anulada,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pendiente => "Pendiente",
            InvoiceStatus::Parcial => "Parcial",
            InvoiceStatus::Pagada => "Pagada",
            InvoiceStatus::NotaCreditoParcial => "Nota de Crédito Parcial",
            InvoiceStatus::Anulada => "Anulada",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "Parcial" => InvoiceStatus::Parcial,
            "Pagada" => InvoiceStatus::Pagada,
            "Nota de Crédito Parcial" => InvoiceStatus::NotaCreditoParcial,
            "Anulada" => InvoiceStatus::Anulada,
            _ => InvoiceStatus::Pendiente,
        }
    }

    /// Recompute the stored status from the paid amount, the credit-note
    /// contribution to it, and the invoice total. Ties resolve in the
    /// documented order: full coverage by credit notes annuls the invoice,
    /// full coverage otherwise pays it, partial credit marks it, partial
    /// payment follows, everything else stays pending.
    pub fn derive(paid_amount: Decimal, credit_total: Decimal, total: Decimal) -> Self {
        let tol = tolerance();
        if (total - paid_amount).abs() <= tol {
            if credit_total > Decimal::ZERO && credit_total >= total - tol {
                return InvoiceStatus::Anulada;
            }
            if total > tol {
                return InvoiceStatus::Pagada;
            }
        }
        if paid_amount > Decimal::ZERO {
            if credit_total > Decimal::ZERO {
                return InvoiceStatus::NotaCreditoParcial;
            }
            return InvoiceStatus::Parcial;
        }
        InvoiceStatus::Pendiente
    }

    /// Display-time status: a pending invoice past its due date reads as
    /// "Vencida", but that value is never written back to storage.
    pub fn display(&self, due_date: Option<NaiveDate>, today: NaiveDate) -> &'static str {
        if *self == InvoiceStatus::Pendiente {
            if let Some(due) = due_date {
                if due < today {
                    return "Vencida";
                }
            }
        }
        self.as_str()
    }
}

/// Invoice header. Client name and RNC are snapshots taken at issuance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub ncf: Option<String>,
    pub fiscal_type: String,
    pub client_id: Uuid,
    pub client_name: String,
    pub client_rnc: Option<String>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub subtotal: Decimal,
    pub discount_pct: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub credit_total: Decimal,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn display_status(&self, today: NaiveDate) -> &'static str {
        self.status().display(self.due_date, today)
    }
}

/// One invoice line. Product name is a snapshot; quantity and price are
/// whatever the document was issued with.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_pct: Decimal,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub sort_order: i32,
}

/// Per-line amounts computed before persistence.
#[derive(Debug, Clone)]
pub struct ItemAmounts {
    pub subtotal: Decimal,
    pub total: Decimal,
}

/// Aggregate document amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Compute one line's amounts: `subtotal = qty x price`, line discount
/// applied on top.
pub fn compute_item_amounts(
    quantity: Decimal,
    unit_price: Decimal,
    discount_pct: Decimal,
) -> ItemAmounts {
    let subtotal = (quantity * unit_price).round_dp(2);
    let discount = (subtotal * discount_pct / Decimal::ONE_HUNDRED).round_dp(2);
    ItemAmounts {
        subtotal,
        total: subtotal - discount,
    }
}

/// Aggregate document totals: the general discount applies to the sum of
/// line totals, tax applies to the discounted subtotal.
pub fn compute_invoice_totals(
    line_totals: &[Decimal],
    discount_pct: Decimal,
    tax_rate: Decimal,
) -> InvoiceTotals {
    let subtotal: Decimal = line_totals.iter().copied().sum();
    let discount_amount = (subtotal * discount_pct / Decimal::ONE_HUNDRED).round_dp(2);
    let taxable = subtotal - discount_amount;
    let tax = (taxable * tax_rate).round_dp(2);
    InvoiceTotals {
        subtotal,
        discount_amount,
        tax,
        total: taxable + tax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn item_amounts_apply_line_discount() {
        let amounts = compute_item_amounts(dec!(2), dec!(50.00), dec!(10));
        assert_eq!(amounts.subtotal, dec!(100.00));
        assert_eq!(amounts.total, dec!(90.00));
    }

    #[test]
    fn invoice_totals_tax_on_discounted_subtotal() {
        // 100 subtotal, no discount, 18% ITBIS.
        let totals = compute_invoice_totals(&[dec!(100.00)], Decimal::ZERO, dec!(0.18));
        assert_eq!(totals.subtotal, dec!(100.00));
        assert_eq!(totals.tax, dec!(18.00));
        assert_eq!(totals.total, dec!(118.00));
    }

    #[test]
    fn invoice_totals_general_discount_before_tax() {
        let totals = compute_invoice_totals(&[dec!(80.00), dec!(20.00)], dec!(10), dec!(0.18));
        assert_eq!(totals.discount_amount, dec!(10.00));
        assert_eq!(totals.tax, dec!(16.20));
        assert_eq!(totals.total, dec!(106.20));
    }

    #[test]
    fn status_pending_until_paid() {
        let s = InvoiceStatus::derive(Decimal::ZERO, Decimal::ZERO, dec!(118.00));
        assert_eq!(s, InvoiceStatus::Pendiente);
    }

    #[test]
    fn status_partial_then_paid() {
        assert_eq!(
            InvoiceStatus::derive(dec!(50.00), Decimal::ZERO, dec!(118.00)),
            InvoiceStatus::Parcial
        );
        assert_eq!(
            InvoiceStatus::derive(dec!(118.00), Decimal::ZERO, dec!(118.00)),
            InvoiceStatus::Pagada
        );
    }

    #[test]
    fn status_paid_within_tolerance() {
        assert_eq!(
            InvoiceStatus::derive(dec!(117.995), Decimal::ZERO, dec!(118.00)),
            InvoiceStatus::Pagada
        );
    }

    #[test]
    fn status_full_credit_annuls() {
        assert_eq!(
            InvoiceStatus::derive(dec!(118.00), dec!(118.00), dec!(118.00)),
            InvoiceStatus::Anulada
        );
    }

    #[test]
    fn status_full_coverage_with_partial_credit_is_paid() {
        // Covered in full, but the credit notes alone do not reach the total.
        assert_eq!(
            InvoiceStatus::derive(dec!(118.00), dec!(68.00), dec!(118.00)),
            InvoiceStatus::Pagada
        );
    }

    #[test]
    fn status_partial_credit_marks_credit_note() {
        assert_eq!(
            InvoiceStatus::derive(dec!(68.00), dec!(68.00), dec!(118.00)),
            InvoiceStatus::NotaCreditoParcial
        );
        // Mixed payment + credit note, still short of the total.
        assert_eq!(
            InvoiceStatus::derive(dec!(90.00), dec!(40.00), dec!(118.00)),
            InvoiceStatus::NotaCreditoParcial
        );
    }

    #[test]
    fn status_zero_total_invoice_stays_pending() {
        assert_eq!(
            InvoiceStatus::derive(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            InvoiceStatus::Pendiente
        );
    }

    #[test]
    fn overdue_is_display_only() {
        let due = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(
            InvoiceStatus::Pendiente.display(Some(due), today),
            "Vencida"
        );
        // Paid invoices never read as overdue.
        assert_eq!(InvoiceStatus::Pagada.display(Some(due), today), "Pagada");
        // Not yet due.
        assert_eq!(
            InvoiceStatus::Pendiente.display(Some(today), today),
            "Pendiente"
        );
    }

    #[test]
    fn ncf_series_prefixes() {
        assert_eq!(FiscalDocType::Consumo.series_prefix(), Some("B02"));
        assert_eq!(FiscalDocType::NotaCredito.series_prefix(), Some("B04"));
        assert_eq!(FiscalDocType::SinComprobante.series_prefix(), None);
    }
}
