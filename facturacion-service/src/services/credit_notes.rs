//! Credit note engine: issues, edits and deletes credit notes against an
//! original invoice, with proportional tax allocation, credited-quantity
//! capping across the invoice's current notes, and the stock adjustment
//! mirrored from the original sale.

use crate::dtos::{CreateCreditNoteRequest, CreditNoteItemRequest, CreditNoteWithItems, UpdateCreditNoteRequest};
use crate::models::{
    compute_item_amounts, CreditNote, CreditNoteItem, Invoice, InvoiceItem, MovementType,
};
use crate::services::database::Database;
use crate::services::metrics::{CREDIT_NOTES_TOTAL, DB_QUERY_DURATION};
use crate::services::payments::{apply_credit_note, lock_invoice, reverse_credit_note};
use crate::services::sequence;
use crate::services::stock::{self, MovementMeta, StockDemand, StockDirection};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Per-line computed amounts plus the proportional tax share.
struct PreparedCredit {
    product_id: Uuid,
    product_name: String,
    quantity: Decimal,
    unit_price: Decimal,
    discount_pct: Decimal,
    subtotal: Decimal,
    total: Decimal,
    tax_share: Decimal,
}

/// Quantity already credited per product across an invoice's current credit
/// notes, optionally excluding one note (its own lines don't cap an edit).
async fn credited_so_far(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    exclude_note: Option<Uuid>,
) -> Result<HashMap<Uuid, Decimal>, AppError> {
    #[derive(sqlx::FromRow)]
    struct CreditedRow {
        product_id: Uuid,
        credited: Decimal,
    }

    let rows = sqlx::query_as::<_, CreditedRow>(
        r#"
        SELECT cni.product_id, SUM(cni.quantity) AS credited
        FROM credit_note_items cni
        JOIN credit_notes cn ON cn.credit_note_id = cni.credit_note_id
        WHERE cn.invoice_id = $1
          AND ($2::uuid IS NULL OR cn.credit_note_id <> $2)
        GROUP BY cni.product_id
        "#,
    )
    .bind(invoice_id)
    .bind(exclude_note)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to sum credited quantities: {}", e))
    })?;

    Ok(rows.into_iter().map(|r| (r.product_id, r.credited)).collect())
}

/// Enforce the cap: per product, credited quantity across the current notes
/// never exceeds what the invoice originally sold. Rejects before any stock
/// is touched.
fn validate_credited_quantities(
    invoice_items: &[InvoiceItem],
    already_credited: &HashMap<Uuid, Decimal>,
    requested: &[CreditNoteItemRequest],
) -> Result<(), AppError> {
    let mut sold: HashMap<Uuid, Decimal> = HashMap::new();
    for item in invoice_items {
        *sold.entry(item.product_id).or_insert(Decimal::ZERO) += item.quantity;
    }

    let mut asked: HashMap<Uuid, Decimal> = HashMap::new();
    for item in requested {
        *asked.entry(item.product_id).or_insert(Decimal::ZERO) += item.quantity;
    }

    let mut violations: Vec<String> = Vec::new();
    for (product_id, quantity) in &asked {
        let Some(original) = sold.get(product_id) else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Product {} is not on the original invoice",
                product_id
            )));
        };
        let prior = already_credited
            .get(product_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let remaining = *original - prior;
        if *quantity > remaining {
            violations.push(format!(
                "product {}: requested {}, creditable {}",
                product_id, quantity, remaining
            ));
        }
    }

    if !violations.is_empty() {
        violations.sort();
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Credited quantity exceeds the invoiced quantity: {}",
            violations.join("; ")
        )));
    }

    Ok(())
}

/// Compute line amounts and the proportional tax allocation: each credited
/// line carries `(line total / invoice subtotal) x invoice tax`, not a flat
/// re-application of the tax rate.
fn prepare_credits(
    items: &[CreditNoteItemRequest],
    locked: &[stock::LockedProduct],
    invoice: &Invoice,
) -> Vec<PreparedCredit> {
    items
        .iter()
        .map(|item| {
            let amounts = compute_item_amounts(item.quantity, item.unit_price, item.discount_pct);
            let tax_share = if invoice.subtotal > Decimal::ZERO {
                (amounts.total / invoice.subtotal * invoice.tax).round_dp(2)
            } else {
                Decimal::ZERO
            };
            let name = locked
                .iter()
                .find(|p| p.product_id == item.product_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            PreparedCredit {
                product_id: item.product_id,
                product_name: name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount_pct: item.discount_pct,
                subtotal: amounts.subtotal,
                total: amounts.total,
                tax_share,
            }
        })
        .collect()
}

fn credit_demands(items: &[CreditNoteItemRequest]) -> Vec<StockDemand> {
    items
        .iter()
        .map(|item| StockDemand {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect()
}

async fn insert_credit_items(
    tx: &mut Transaction<'_, Postgres>,
    credit_note_id: Uuid,
    prepared: &[PreparedCredit],
) -> Result<Vec<CreditNoteItem>, AppError> {
    let mut inserted = Vec::with_capacity(prepared.len());
    for item in prepared {
        let row = sqlx::query_as::<_, CreditNoteItem>(
            r#"
            INSERT INTO credit_note_items (
                item_id, credit_note_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING item_id, credit_note_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credit_note_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.discount_pct)
        .bind(item.subtotal)
        .bind(item.total)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert credit note item: {}", e))
        })?;
        inserted.push(row);
    }
    Ok(inserted)
}

async fn load_invoice_items(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> Result<Vec<InvoiceItem>, AppError> {
    sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT item_id, invoice_id, product_id, product_name, quantity, unit_price,
            discount_pct, subtotal, total, sort_order
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY sort_order
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice items: {}", e)))
}

/// Credit note lifecycle coordinator.
#[derive(Clone)]
pub struct CreditNoteEngine {
    db: Database,
}

impl CreditNoteEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Issue a credit note against an invoice: cap validation, proportional
    /// tax, fiscal numbering, stock re-subtraction and reconciliation, all
    /// in one transaction.
    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    pub async fn create(
        &self,
        input: &CreateCreditNoteRequest,
    ) -> Result<CreditNoteWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_credit_note"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = lock_invoice(&mut tx, input.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let invoice_items = load_invoice_items(&mut tx, invoice.invoice_id).await?;
        let already = credited_so_far(&mut tx, invoice.invoice_id, None).await?;
        validate_credited_quantities(&invoice_items, &already, &input.items)?;

        let product_ids: Vec<Uuid> = input.items.iter().map(|i| i.product_id).collect();
        let locked = stock::lock_products(&mut tx, &product_ids).await?;

        // The credit re-subtracts stock, mirroring the original sale's
        // direction, so the availability invariant applies here too.
        let demands = credit_demands(&input.items);
        stock::validate_availability(&locked, &demands)?;

        let prepared = prepare_credits(&input.items, &locked, &invoice);
        let subtotal: Decimal = prepared.iter().map(|p| p.total).sum();
        let tax: Decimal = prepared.iter().map(|p| p.tax_share).sum();
        let total = subtotal + tax;

        let doc_seq = sequence::next_value(&mut tx, sequence::CREDIT_NOTE_PREFIX).await?;
        let credit_note_number =
            sequence::format_document_number(sequence::CREDIT_NOTE_PREFIX, doc_seq);
        let ncf_seq = sequence::next_value(&mut tx, sequence::CREDIT_NOTE_NCF_SERIES).await?;
        let ncf = sequence::format_ncf(sequence::CREDIT_NOTE_NCF_SERIES, ncf_seq);

        let credit_note_id = Uuid::new_v4();
        let insert_result = sqlx::query_as::<_, CreditNote>(
            r#"
            INSERT INTO credit_notes (
                credit_note_id, credit_note_number, ncf, invoice_id, invoice_number, invoice_ncf,
                client_id, client_name, client_rnc, issue_date, reason, subtotal, tax, total, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING credit_note_id, credit_note_number, ncf, invoice_id, invoice_number,
                invoice_ncf, client_id, client_name, client_rnc, issue_date, reason,
                subtotal, tax, total, notes, created_utc, updated_utc
            "#,
        )
        .bind(credit_note_id)
        .bind(&credit_note_number)
        .bind(&ncf)
        .bind(invoice.invoice_id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.ncf)
        .bind(invoice.client_id)
        .bind(&invoice.client_name)
        .bind(&invoice.client_rnc)
        .bind(input.issue_date)
        .bind(&input.reason)
        .bind(subtotal)
        .bind(tax)
        .bind(total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await;

        let credit_note = match insert_result {
            Ok(note) => note,
            Err(e) => return Err(self.map_insert_error(tx, e).await),
        };

        let items = insert_credit_items(&mut tx, credit_note_id, &prepared).await?;

        stock::adjust(
            &mut tx,
            &demands,
            StockDirection::Subtract,
            Some(&MovementMeta {
                movement_type: MovementType::Salida,
                reference: credit_note_number.clone(),
                date: input.issue_date,
                notes: Some(format!(
                    "Nota de crédito {} — factura {}",
                    credit_note_number, invoice.invoice_number
                )),
            }),
        )
        .await?;

        apply_credit_note(&mut tx, invoice.invoice_id, total).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        CREDIT_NOTES_TOTAL.with_label_values(&["create"]).inc();

        info!(
            credit_note_id = %credit_note.credit_note_id,
            credit_note_number = %credit_note.credit_note_number,
            ncf = %credit_note.ncf,
            total = %credit_note.total,
            "Credit note issued"
        );

        Ok(CreditNoteWithItems { credit_note, items })
    }

    /// Edit a credit note: the old stock effect and invoice contribution are
    /// reversed, the new ones applied, under the same document numbers.
    #[instrument(skip(self, input), fields(credit_note_id = %credit_note_id))]
    pub async fn update(
        &self,
        credit_note_id: Uuid,
        input: &UpdateCreditNoteRequest,
    ) -> Result<CreditNoteWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_credit_note"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = self.lock_credit_note(&mut tx, credit_note_id).await?;
        let invoice = lock_invoice(&mut tx, existing.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let invoice_items = load_invoice_items(&mut tx, invoice.invoice_id).await?;
        // This note's own lines are excluded from the cap: the edit replaces
        // them.
        let already = credited_so_far(&mut tx, invoice.invoice_id, Some(credit_note_id)).await?;
        validate_credited_quantities(&invoice_items, &already, &input.items)?;

        let old_items = sqlx::query_as::<_, CreditNoteItem>(
            r#"
            SELECT item_id, credit_note_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total
            FROM credit_note_items
            WHERE credit_note_id = $1
            "#,
        )
        .bind(credit_note_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load credit note items: {}", e))
        })?;

        let mut union_ids: Vec<Uuid> = old_items.iter().map(|i| i.product_id).collect();
        union_ids.extend(input.items.iter().map(|i| i.product_id));
        stock::lock_products(&mut tx, &union_ids).await?;

        // Revert the old credit's stock effect silently; its audit rows are
        // regenerated below.
        let old_demands: Vec<StockDemand> = old_items
            .iter()
            .map(|i| StockDemand {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect();
        stock::adjust(&mut tx, &old_demands, StockDirection::Add, None).await?;
        stock::remove_movements(&mut tx, &existing.credit_note_number).await?;

        let new_ids: Vec<Uuid> = input.items.iter().map(|i| i.product_id).collect();
        let locked = stock::lock_products(&mut tx, &new_ids).await?;
        let demands = credit_demands(&input.items);
        stock::validate_availability(&locked, &demands)?;

        let prepared = prepare_credits(&input.items, &locked, &invoice);
        let subtotal: Decimal = prepared.iter().map(|p| p.total).sum();
        let tax: Decimal = prepared.iter().map(|p| p.tax_share).sum();
        let total = subtotal + tax;

        stock::adjust(
            &mut tx,
            &demands,
            StockDirection::Subtract,
            Some(&MovementMeta {
                movement_type: MovementType::Salida,
                reference: existing.credit_note_number.clone(),
                date: input.issue_date,
                notes: Some(format!(
                    "Nota de crédito {} — factura {}",
                    existing.credit_note_number, invoice.invoice_number
                )),
            }),
        )
        .await?;

        sqlx::query("DELETE FROM credit_note_items WHERE credit_note_id = $1")
            .bind(credit_note_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete old items: {}", e))
            })?;

        let items = insert_credit_items(&mut tx, credit_note_id, &prepared).await?;

        let credit_note = sqlx::query_as::<_, CreditNote>(
            r#"
            UPDATE credit_notes
            SET issue_date = $2, reason = $3, subtotal = $4, tax = $5, total = $6, notes = $7,
                updated_utc = NOW()
            WHERE credit_note_id = $1
            RETURNING credit_note_id, credit_note_number, ncf, invoice_id, invoice_number,
                invoice_ncf, client_id, client_name, client_rnc, issue_date, reason,
                subtotal, tax, total, notes, created_utc, updated_utc
            "#,
        )
        .bind(credit_note_id)
        .bind(input.issue_date)
        .bind(&input.reason)
        .bind(subtotal)
        .bind(tax)
        .bind(total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update credit note: {}", e))
        })?;

        // Swap the old contribution for the new one on the invoice.
        reverse_credit_note(&mut tx, invoice.invoice_id, existing.total).await?;
        apply_credit_note(&mut tx, invoice.invoice_id, total).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        CREDIT_NOTES_TOTAL.with_label_values(&["update"]).inc();

        info!(
            credit_note_id = %credit_note_id,
            credit_note_number = %credit_note.credit_note_number,
            total = %credit_note.total,
            "Credit note updated"
        );

        Ok(CreditNoteWithItems { credit_note, items })
    }

    /// Delete a credit note: its stock effect and invoice contribution are
    /// reversed, then the vacated series cursors are resynchronized.
    #[instrument(skip(self), fields(credit_note_id = %credit_note_id))]
    pub async fn delete(&self, credit_note_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_credit_note"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = self.lock_credit_note(&mut tx, credit_note_id).await?;
        lock_invoice(&mut tx, existing.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let old_items = sqlx::query_as::<_, CreditNoteItem>(
            r#"
            SELECT item_id, credit_note_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total
            FROM credit_note_items
            WHERE credit_note_id = $1
            "#,
        )
        .bind(credit_note_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load credit note items: {}", e))
        })?;

        let demands: Vec<StockDemand> = old_items
            .iter()
            .map(|i| StockDemand {
                product_id: i.product_id,
                quantity: i.quantity,
            })
            .collect();
        stock::adjust(&mut tx, &demands, StockDirection::Add, None).await?;
        stock::remove_movements(&mut tx, &existing.credit_note_number).await?;

        sqlx::query("DELETE FROM credit_notes WHERE credit_note_id = $1")
            .bind(credit_note_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete credit note: {}", e))
            })?;

        reverse_credit_note(&mut tx, existing.invoice_id, existing.total).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        sequence::resync(self.db.pool(), sequence::CREDIT_NOTE_PREFIX).await?;
        sequence::resync(self.db.pool(), sequence::CREDIT_NOTE_NCF_SERIES).await?;

        timer.observe_duration();
        CREDIT_NOTES_TOTAL.with_label_values(&["delete"]).inc();

        info!(
            credit_note_id = %credit_note_id,
            credit_note_number = %existing.credit_note_number,
            "Credit note deleted"
        );

        Ok(())
    }

    async fn lock_credit_note(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        credit_note_id: Uuid,
    ) -> Result<CreditNote, AppError> {
        sqlx::query_as::<_, CreditNote>(
            r#"
            SELECT credit_note_id, credit_note_number, ncf, invoice_id, invoice_number,
                invoice_ncf, client_id, client_name, client_rnc, issue_date, reason,
                subtotal, tax, total, notes, created_utc, updated_utc
            FROM credit_notes
            WHERE credit_note_id = $1
            FOR UPDATE
            "#,
        )
        .bind(credit_note_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock credit note: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Credit note not found")))
    }

    /// Translate a credit-note insert failure; a unique violation on either
    /// number resynchronizes its cursor and surfaces a retryable conflict.
    async fn map_insert_error(&self, tx: Transaction<'_, Postgres>, err: sqlx::Error) -> AppError {
        let constraint = match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                db_err.constraint().map(|c| c.to_string())
            }
            _ => None,
        };

        let Some(constraint) = constraint else {
            return AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert credit note: {}",
                err
            ));
        };

        tx.rollback().await.ok();

        let prefix = if constraint.contains("ncf") {
            sequence::CREDIT_NOTE_NCF_SERIES
        } else {
            sequence::CREDIT_NOTE_PREFIX
        };

        warn!(
            constraint = %constraint,
            prefix = prefix,
            "Credit note number collision; resynchronizing sequence"
        );

        if let Err(resync_err) = sequence::resync(self.db.pool(), prefix).await {
            return resync_err;
        }

        AppError::SequenceConflict(prefix.to_string())
    }

    /// Read model for one credit note.
    pub async fn detail(&self, credit_note_id: Uuid) -> Result<CreditNoteWithItems, AppError> {
        let credit_note = self
            .db
            .get_credit_note(credit_note_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Credit note not found")))?;
        let items = self.db.get_credit_note_items(credit_note_id).await?;
        Ok(CreditNoteWithItems { credit_note, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn invoice_item(product_id: Uuid, quantity: Decimal) -> InvoiceItem {
        InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            product_id,
            product_name: "Producto".to_string(),
            quantity,
            unit_price: dec!(100.00),
            discount_pct: Decimal::ZERO,
            subtotal: dec!(100.00),
            total: dec!(100.00),
            sort_order: 0,
        }
    }

    fn request_item(product_id: Uuid, quantity: Decimal) -> CreditNoteItemRequest {
        CreditNoteItemRequest {
            product_id,
            quantity,
            unit_price: dec!(100.00),
            discount_pct: Decimal::ZERO,
        }
    }

    fn test_invoice(subtotal: Decimal, tax: Decimal) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "FAC-000001".to_string(),
            ncf: Some("B0200000001".to_string()),
            fiscal_type: "B02".to_string(),
            client_id: Uuid::new_v4(),
            client_name: "Cliente".to_string(),
            client_rnc: None,
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            due_date: None,
            status: "Pendiente".to_string(),
            subtotal,
            discount_pct: Decimal::ZERO,
            tax,
            total: subtotal + tax,
            paid_amount: Decimal::ZERO,
            credit_total: Decimal::ZERO,
            notes: None,
            created_utc: chrono::Utc::now(),
            updated_utc: None,
        }
    }

    #[test]
    fn credited_quantity_capped_by_invoice() {
        let product = Uuid::new_v4();
        let items = vec![invoice_item(product, dec!(5))];
        let already = HashMap::new();

        assert!(validate_credited_quantities(
            &items,
            &already,
            &[request_item(product, dec!(5))]
        )
        .is_ok());

        assert!(validate_credited_quantities(
            &items,
            &already,
            &[request_item(product, dec!(6))]
        )
        .is_err());
    }

    #[test]
    fn credited_quantity_counts_prior_notes() {
        let product = Uuid::new_v4();
        let items = vec![invoice_item(product, dec!(5))];
        let mut already = HashMap::new();
        already.insert(product, dec!(3));

        assert!(validate_credited_quantities(
            &items,
            &already,
            &[request_item(product, dec!(2))]
        )
        .is_ok());
        assert!(validate_credited_quantities(
            &items,
            &already,
            &[request_item(product, dec!(3))]
        )
        .is_err());
    }

    #[test]
    fn rejects_products_missing_from_invoice() {
        let items = vec![invoice_item(Uuid::new_v4(), dec!(5))];
        let result = validate_credited_quantities(
            &items,
            &HashMap::new(),
            &[request_item(Uuid::new_v4(), dec!(1))],
        );
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn proportional_tax_full_item_credits_full_tax() {
        let product = Uuid::new_v4();
        let invoice = test_invoice(dec!(100.00), dec!(18.00));
        let locked = vec![stock::LockedProduct {
            product_id: product,
            name: "Producto".to_string(),
            stock: dec!(50),
        }];
        let prepared = prepare_credits(&[request_item(product, dec!(1))], &locked, &invoice);

        assert_eq!(prepared[0].total, dec!(100.00));
        assert_eq!(prepared[0].tax_share, dec!(18.00));
    }

    #[test]
    fn proportional_tax_splits_by_line_share() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // Invoice subtotal 200, tax 36; crediting one 100-line carries half
        // the tax.
        let invoice = test_invoice(dec!(200.00), dec!(36.00));
        let locked = vec![
            stock::LockedProduct {
                product_id: a,
                name: "A".to_string(),
                stock: dec!(50),
            },
            stock::LockedProduct {
                product_id: b,
                name: "B".to_string(),
                stock: dec!(50),
            },
        ];
        let prepared = prepare_credits(&[request_item(a, dec!(1))], &locked, &invoice);
        assert_eq!(prepared[0].tax_share, dec!(18.00));
    }

    #[test]
    fn proportional_tax_zero_subtotal_invoice() {
        let product = Uuid::new_v4();
        let invoice = test_invoice(Decimal::ZERO, Decimal::ZERO);
        let locked = vec![stock::LockedProduct {
            product_id: product,
            name: "Producto".to_string(),
            stock: dec!(50),
        }];
        let prepared = prepare_credits(&[request_item(product, dec!(1))], &locked, &invoice);
        assert_eq!(prepared[0].tax_share, Decimal::ZERO);
    }
}
