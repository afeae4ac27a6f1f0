//! Payment reconciler: applies and reverses payments and credit-note
//! contributions against an invoice, recomputing the stored status from the
//! pure state machine, and offers the repair sweep that rebuilds cached
//! totals from the authoritative child records.

use crate::dtos::{CreatePaymentRequest, ReconcileSummary, UpdatePaymentRequest};
use crate::models::{Invoice, InvoiceStatus, Payment};
use crate::services::database::Database;
use crate::services::metrics::{DB_QUERY_DURATION, PAYMENTS_TOTAL};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, ncf, fiscal_type, client_id, \
     client_name, client_rnc, issue_date, due_date, status, subtotal, discount_pct, tax, total, \
     paid_amount, credit_total, notes, created_utc, updated_utc";

/// Load an invoice under a row lock for the remainder of the transaction.
pub(crate) async fn lock_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> Result<Option<Invoice>, AppError> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE"
    ))
    .bind(invoice_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

    Ok(invoice)
}

/// Accumulate deltas onto the invoice's cached totals and re-derive its
/// status. The single entry point every apply/reverse operation goes
/// through, so the cached fields can only move together.
async fn apply_to_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    paid_delta: Decimal,
    credit_delta: Decimal,
) -> Result<Invoice, AppError> {
    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        r#"
        UPDATE invoices
        SET paid_amount = paid_amount + $2,
            credit_total = credit_total + $3,
            updated_utc = NOW()
        WHERE invoice_id = $1
        RETURNING {INVOICE_COLUMNS}
        "#
    ))
    .bind(invoice_id)
    .bind(paid_delta)
    .bind(credit_delta)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to apply to invoice: {}", e)))?;

    set_derived_status(tx, invoice).await
}

/// Write the derived status back if it changed, returning the final row.
async fn set_derived_status(
    tx: &mut Transaction<'_, Postgres>,
    invoice: Invoice,
) -> Result<Invoice, AppError> {
    let status = InvoiceStatus::derive(invoice.paid_amount, invoice.credit_total, invoice.total);
    if status.as_str() == invoice.status {
        return Ok(invoice);
    }

    let updated = sqlx::query_as::<_, Invoice>(&format!(
        "UPDATE invoices SET status = $2 WHERE invoice_id = $1 RETURNING {INVOICE_COLUMNS}"
    ))
    .bind(invoice.invoice_id)
    .bind(status.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update status: {}", e)))?;

    Ok(updated)
}

/// Add a payment's amount to the invoice and recompute its status.
pub(crate) async fn apply_payment(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    amount: Decimal,
) -> Result<Invoice, AppError> {
    apply_to_invoice(tx, invoice_id, amount, Decimal::ZERO).await
}

/// Remove a payment's amount from the invoice and recompute its status.
pub(crate) async fn reverse_payment(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    amount: Decimal,
) -> Result<Invoice, AppError> {
    apply_to_invoice(tx, invoice_id, -amount, Decimal::ZERO).await
}

/// Add a credit note's total to the invoice, flagged as credit so the state
/// machine can tell `Pagada` from `Anulada`/`Nota de Crédito Parcial`.
pub(crate) async fn apply_credit_note(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    total: Decimal,
) -> Result<Invoice, AppError> {
    apply_to_invoice(tx, invoice_id, total, total).await
}

/// Remove a credit note's contribution from the invoice.
pub(crate) async fn reverse_credit_note(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    total: Decimal,
) -> Result<Invoice, AppError> {
    apply_to_invoice(tx, invoice_id, -total, -total).await
}

/// Payment lifecycle and the reconciliation sweep.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Database,
}

impl PaymentReconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a payment and apply it to its invoice in one transaction.
    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    pub async fn create_payment(&self, input: &CreatePaymentRequest) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payment"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = lock_invoice(&mut tx, input.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let outstanding = invoice.total - invoice.paid_amount;
        if input.amount > outstanding {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount {} exceeds outstanding balance {}",
                input.amount,
                outstanding
            )));
        }

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.invoice_id)
        .bind(&invoice.invoice_number)
        .bind(input.amount)
        .bind(&input.method)
        .bind(input.payment_date)
        .bind(&input.reference)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert payment: {}", e)))?;

        let invoice = apply_payment(&mut tx, invoice.invoice_id, payment.amount).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        PAYMENTS_TOTAL.with_label_values(&[&payment.method]).inc();

        info!(
            payment_id = %payment.payment_id,
            invoice_number = %payment.invoice_number,
            amount = %payment.amount,
            status = %invoice.status,
            "Payment registered"
        );

        Ok(payment)
    }

    /// Explicit payment edit: applies the amount delta to the invoice and
    /// recomputes its status.
    #[instrument(skip(self, input), fields(payment_id = %payment_id))]
    pub async fn update_payment(
        &self,
        payment_id: Uuid,
        input: &UpdatePaymentRequest,
    ) -> Result<Payment, AppError> {
        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load payment: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        let invoice = lock_invoice(&mut tx, existing.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let delta = input.amount - existing.amount;
        let outstanding = invoice.total - invoice.paid_amount;
        if delta > outstanding {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount {} exceeds outstanding balance {}",
                input.amount,
                outstanding + existing.amount
            )));
        }

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET amount = $2, method = $3, payment_date = $4, reference = $5, notes = $6
            WHERE payment_id = $1
            RETURNING payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(input.amount)
        .bind(&input.method)
        .bind(input.payment_date)
        .bind(&input.reference)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update payment: {}", e)))?;

        apply_payment(&mut tx, existing.invoice_id, delta).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        info!(payment_id = %payment_id, delta = %delta, "Payment updated");

        Ok(payment)
    }

    /// Remove a payment and reverse its effect on the invoice.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, invoice_number, amount, method, payment_date,
                reference, notes, created_utc
            FROM payments
            WHERE payment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load payment: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

        lock_invoice(&mut tx, existing.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        sqlx::query("DELETE FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete payment: {}", e))
            })?;

        reverse_payment(&mut tx, existing.invoice_id, existing.amount).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        info!(
            payment_id = %payment_id,
            invoice_number = %existing.invoice_number,
            amount = %existing.amount,
            "Payment deleted"
        );

        Ok(())
    }

    /// Consistency sweep: recompute every invoice's paid amount and status
    /// from the authoritative payment and credit-note records. Idempotent;
    /// each invoice is repaired in its own transaction so the sweep is safe
    /// to run concurrently with normal traffic.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_all"])
            .start_timer();

        let invoice_ids: Vec<Uuid> = sqlx::query_scalar("SELECT invoice_id FROM invoices")
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e))
            })?;

        let mut repaired = 0u64;
        for invoice_id in &invoice_ids {
            if self.reconcile_one(*invoice_id).await? {
                repaired += 1;
            }
        }

        timer.observe_duration();

        info!(
            invoices_checked = invoice_ids.len(),
            invoices_repaired = repaired,
            "Reconciliation sweep finished"
        );

        Ok(ReconcileSummary {
            invoices_checked: invoice_ids.len() as u64,
            invoices_repaired: repaired,
        })
    }

    /// Repair one invoice from ground truth. Returns whether anything
    /// actually changed.
    async fn reconcile_one(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // The invoice may have been deleted since the id listing; skip.
        let Some(invoice) = lock_invoice(&mut tx, invoice_id).await? else {
            tx.rollback().await.ok();
            return Ok(false);
        };

        let payment_sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        let credit_sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total), 0) FROM credit_notes WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum credit notes: {}", e))
        })?;

        let paid_amount = payment_sum + credit_sum;
        let status = InvoiceStatus::derive(paid_amount, credit_sum, invoice.total);

        let changed = paid_amount != invoice.paid_amount
            || credit_sum != invoice.credit_total
            || status.as_str() != invoice.status;

        if changed {
            sqlx::query(
                r#"
                UPDATE invoices
                SET paid_amount = $2, credit_total = $3, status = $4, updated_utc = NOW()
                WHERE invoice_id = $1
                "#,
            )
            .bind(invoice_id)
            .bind(paid_amount)
            .bind(credit_sum)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to repair invoice: {}", e))
            })?;

            info!(
                invoice_id = %invoice_id,
                paid_amount = %paid_amount,
                credit_total = %credit_sum,
                status = status.as_str(),
                "Invoice repaired from ground truth"
            );
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        Ok(changed)
    }
}
