//! Invoice ledger: document lifecycle with fiscal numbering, stock
//! consistency and cascading cleanup, every operation a single transaction.

use crate::dtos::{
    CreateInvoiceRequest, InvoiceDetail, InvoiceItemRequest, InvoiceListQuery, InvoiceWithItems,
    UpdateInvoiceRequest,
};
use crate::models::{
    compute_invoice_totals, compute_item_amounts, Client, FiscalDocType, Invoice, InvoiceItem,
    InvoiceStatus, InvoiceTotals, MovementType,
};
use crate::services::database::Database;
use crate::services::metrics::{DB_QUERY_DURATION, INVOICES_TOTAL};
use crate::services::payments::lock_invoice;
use crate::services::sequence;
use crate::services::stock::{self, MovementMeta, StockDemand, StockDirection};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Parse and bound the fiscal type coming from a request.
fn parse_fiscal_type(raw: &str) -> Result<FiscalDocType, AppError> {
    match raw {
        "B01" | "B02" | "B14" | "B15" | "SIN" => Ok(FiscalDocType::from_string(raw)),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unknown fiscal document type '{}'",
            other
        ))),
    }
}

fn demands_of(items: &[InvoiceItemRequest]) -> Vec<StockDemand> {
    items
        .iter()
        .map(|item| StockDemand {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect()
}

fn item_demands(items: &[InvoiceItem]) -> Vec<StockDemand> {
    items
        .iter()
        .map(|item| StockDemand {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect()
}

/// Per-line computed amounts ready for insertion.
struct PreparedItem {
    product_id: Uuid,
    product_name: String,
    quantity: Decimal,
    unit_price: Decimal,
    discount_pct: Decimal,
    subtotal: Decimal,
    total: Decimal,
}

fn prepare_items(
    items: &[InvoiceItemRequest],
    locked: &[stock::LockedProduct],
) -> Vec<PreparedItem> {
    items
        .iter()
        .map(|item| {
            let amounts = compute_item_amounts(item.quantity, item.unit_price, item.discount_pct);
            let name = locked
                .iter()
                .find(|p| p.product_id == item.product_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            PreparedItem {
                product_id: item.product_id,
                product_name: name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount_pct: item.discount_pct,
                subtotal: amounts.subtotal,
                total: amounts.total,
            }
        })
        .collect()
}

fn totals_of(prepared: &[PreparedItem], discount_pct: Decimal, tax_rate: Decimal) -> InvoiceTotals {
    let line_totals: Vec<Decimal> = prepared.iter().map(|p| p.total).collect();
    compute_invoice_totals(&line_totals, discount_pct, tax_rate)
}

async fn load_client(
    tx: &mut Transaction<'_, Postgres>,
    client_id: Uuid,
) -> Result<Client, AppError> {
    sqlx::query_as::<_, Client>(
        r#"
        SELECT client_id, name, rnc, email, phone, address, created_utc
        FROM clients
        WHERE client_id = $1
        "#,
    )
    .bind(client_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load client: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client not found")))
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    prepared: &[PreparedItem],
) -> Result<Vec<InvoiceItem>, AppError> {
    let mut inserted = Vec::with_capacity(prepared.len());
    for (i, item) in prepared.iter().enumerate() {
        let row = sqlx::query_as::<_, InvoiceItem>(
            r#"
            INSERT INTO invoice_items (
                item_id, invoice_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total, sort_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING item_id, invoice_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total, sort_order
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.discount_pct)
        .bind(item.subtotal)
        .bind(item.total)
        .bind(i as i32)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice item: {}", e))
        })?;
        inserted.push(row);
    }
    Ok(inserted)
}

/// Invoice lifecycle coordinator.
#[derive(Clone)]
pub struct InvoiceLedger {
    db: Database,
}

impl InvoiceLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an invoice: availability check, fiscal numbering, persistence
    /// and stock subtraction in one atomic transaction. A stock shortfall or
    /// sequence conflict rolls back everything, including the allocated
    /// numbers.
    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn create(&self, input: &CreateInvoiceRequest) -> Result<InvoiceWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let fiscal_type = parse_fiscal_type(&input.fiscal_type)?;

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let client = load_client(&mut tx, input.client_id).await?;

        let product_ids: Vec<Uuid> = input.items.iter().map(|i| i.product_id).collect();
        let locked = stock::lock_products(&mut tx, &product_ids).await?;

        let demands = demands_of(&input.items);
        stock::validate_availability(&locked, &demands)?;

        let prepared = prepare_items(&input.items, &locked);
        let totals = totals_of(&prepared, input.discount_pct, input.tax_rate);

        let doc_seq = sequence::next_value(&mut tx, sequence::INVOICE_PREFIX).await?;
        let invoice_number = sequence::format_document_number(sequence::INVOICE_PREFIX, doc_seq);

        let ncf = match fiscal_type.series_prefix() {
            Some(series) => {
                let value = sequence::next_value(&mut tx, series).await?;
                Some(sequence::format_ncf(series, value))
            }
            None => None,
        };

        let invoice_id = Uuid::new_v4();
        let insert_result = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, ncf, fiscal_type, client_id, client_name, client_rnc,
                issue_date, due_date, status, subtotal, discount_pct, tax, total, paid_amount,
                credit_total, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0, 0, $15)
            RETURNING invoice_id, invoice_number, ncf, fiscal_type, client_id, client_name,
                client_rnc, issue_date, due_date, status, subtotal, discount_pct, tax, total,
                paid_amount, credit_total, notes, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(&invoice_number)
        .bind(&ncf)
        .bind(fiscal_type.as_str())
        .bind(client.client_id)
        .bind(&client.name)
        .bind(&client.rnc)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(InvoiceStatus::Pendiente.as_str())
        .bind(totals.subtotal)
        .bind(input.discount_pct)
        .bind(totals.tax)
        .bind(totals.total)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await;

        let invoice = match insert_result {
            Ok(invoice) => invoice,
            Err(e) => return Err(self.map_insert_error(tx, e, fiscal_type).await),
        };

        let items = insert_items(&mut tx, invoice_id, &prepared).await?;

        stock::adjust(
            &mut tx,
            &demands,
            StockDirection::Subtract,
            Some(&MovementMeta {
                movement_type: MovementType::Salida,
                reference: invoice_number.clone(),
                date: input.issue_date,
                notes: Some(format!("Venta {}", invoice_number)),
            }),
        )
        .await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        INVOICES_TOTAL.with_label_values(&[&invoice.status]).inc();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            ncf = invoice.ncf.as_deref().unwrap_or("-"),
            total = %invoice.total,
            "Invoice created"
        );

        let display_status = invoice.display_status(Utc::now().date_naive()).to_string();
        Ok(InvoiceWithItems {
            invoice,
            items,
            display_status,
        })
    }

    /// Replace an invoice's items and header. Old stock is reverted without
    /// audit rows, the movement history is regenerated under the same
    /// invoice number, and the fiscal identity never changes.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn update(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoiceRequest,
    ) -> Result<InvoiceWithItems, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = lock_invoice(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let client = load_client(&mut tx, input.client_id).await?;

        let old_items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total, sort_order
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load items: {}", e)))?;

        // Lock the union of old and new products up front, in id order.
        let mut union_ids: Vec<Uuid> = old_items.iter().map(|i| i.product_id).collect();
        union_ids.extend(input.items.iter().map(|i| i.product_id));
        stock::lock_products(&mut tx, &union_ids).await?;

        // Revert the old items silently; their audit rows are replaced
        // wholesale below.
        let old_demands = item_demands(&old_items);
        stock::adjust(&mut tx, &old_demands, StockDirection::Add, None).await?;
        stock::remove_movements(&mut tx, &existing.invoice_number).await?;

        // Validate the new item set against the reverted stock.
        let new_ids: Vec<Uuid> = input.items.iter().map(|i| i.product_id).collect();
        let locked = stock::lock_products(&mut tx, &new_ids).await?;
        let demands = demands_of(&input.items);
        stock::validate_availability(&locked, &demands)?;

        let prepared = prepare_items(&input.items, &locked);
        let totals = totals_of(&prepared, input.discount_pct, input.tax_rate);

        stock::adjust(
            &mut tx,
            &demands,
            StockDirection::Subtract,
            Some(&MovementMeta {
                movement_type: MovementType::Salida,
                reference: existing.invoice_number.clone(),
                date: input.issue_date,
                notes: Some(format!("Venta {}", existing.invoice_number)),
            }),
        )
        .await?;

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete old items: {}", e))
            })?;

        let items = insert_items(&mut tx, invoice_id, &prepared).await?;

        // Totals changed, so the status may too; the paid amounts are
        // untouched by an edit.
        let status =
            InvoiceStatus::derive(existing.paid_amount, existing.credit_total, totals.total);

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET client_id = $2, client_name = $3, client_rnc = $4, issue_date = $5,
                due_date = $6, discount_pct = $7, subtotal = $8, tax = $9, total = $10,
                status = $11, notes = $12, updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING invoice_id, invoice_number, ncf, fiscal_type, client_id, client_name,
                client_rnc, issue_date, due_date, status, subtotal, discount_pct, tax, total,
                paid_amount, credit_total, notes, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(client.client_id)
        .bind(&client.name)
        .bind(&client.rnc)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(input.discount_pct)
        .bind(totals.subtotal)
        .bind(totals.tax)
        .bind(totals.total)
        .bind(status.as_str())
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Invoice updated"
        );

        let display_status = invoice.display_status(Utc::now().date_naive()).to_string();
        Ok(InvoiceWithItems {
            invoice,
            items,
            display_status,
        })
    }

    /// Delete an invoice with its full cascade: credit notes (their stock
    /// effect reversed), payments, movement history and stock reversal, all
    /// in one transaction, then resynchronize the affected fiscal series.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete(&self, invoice_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = lock_invoice(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, product_id, product_name, quantity, unit_price,
                discount_pct, subtotal, total, sort_order
            FROM invoice_items
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load items: {}", e)))?;

        #[derive(sqlx::FromRow)]
        struct NoteRef {
            credit_note_id: Uuid,
            credit_note_number: String,
        }
        let notes = sqlx::query_as::<_, NoteRef>(
            r#"
            SELECT credit_note_id, credit_note_number
            FROM credit_notes
            WHERE invoice_id = $1
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load credit notes: {}", e))
        })?;

        // Reverse each credit note's stock effect (they re-subtracted stock
        // when issued, so deleting adds it back) and drop their audit rows.
        #[derive(sqlx::FromRow)]
        struct ItemQty {
            product_id: Uuid,
            quantity: Decimal,
        }
        for note in &notes {
            let note_demands: Vec<StockDemand> = sqlx::query_as::<_, ItemQty>(
                "SELECT product_id, quantity FROM credit_note_items WHERE credit_note_id = $1",
            )
            .bind(note.credit_note_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to load credit note items: {}",
                    e
                ))
            })?
            .into_iter()
            .map(|row| StockDemand {
                product_id: row.product_id,
                quantity: row.quantity,
            })
            .collect();

            stock::adjust(&mut tx, &note_demands, StockDirection::Add, None).await?;
            stock::remove_movements(&mut tx, &note.credit_note_number).await?;
        }

        sqlx::query("DELETE FROM credit_notes WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete credit notes: {}", e))
            })?;

        sqlx::query("DELETE FROM payments WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete payments: {}", e))
            })?;

        // Return the sold quantities to stock and drop the invoice's trail.
        let demands = item_demands(&items);
        stock::adjust(&mut tx, &demands, StockDirection::Add, None).await?;
        stock::remove_movements(&mut tx, &invoice.invoice_number).await?;

        sqlx::query("DELETE FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        // The deleted document vacated sequence slots; pull every affected
        // cursor back to what is actually persisted so a stale counter can
        // never double-issue.
        sequence::resync(self.db.pool(), sequence::INVOICE_PREFIX).await?;
        if invoice.ncf.is_some() {
            if let Some(series) = FiscalDocType::from_string(&invoice.fiscal_type).series_prefix()
            {
                sequence::resync(self.db.pool(), series).await?;
            }
        }
        if !notes.is_empty() {
            sequence::resync(self.db.pool(), sequence::CREDIT_NOTE_PREFIX).await?;
            sequence::resync(self.db.pool(), sequence::CREDIT_NOTE_NCF_SERIES).await?;
        }

        timer.observe_duration();

        info!(
            invoice_id = %invoice_id,
            invoice_number = %invoice.invoice_number,
            credit_notes_removed = notes.len(),
            "Invoice deleted with cascade"
        );

        Ok(())
    }

    /// Full read model for one invoice.
    pub async fn detail(&self, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self
            .db
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        let items = self.db.get_invoice_items(invoice_id).await?;
        let payments = self.db.list_invoice_payments(invoice_id).await?;
        let credit_notes = self.db.list_invoice_credit_notes(invoice_id).await?;

        let display_status = invoice.display_status(Utc::now().date_naive()).to_string();
        Ok(InvoiceDetail {
            invoice,
            items,
            payments,
            credit_notes,
            display_status,
        })
    }

    /// Period listing for the read path.
    pub async fn list(&self, filter: &InvoiceListQuery) -> Result<Vec<Invoice>, AppError> {
        self.db.list_invoices(filter).await
    }

    /// Translate an invoice insert failure. A unique violation on a fiscal
    /// number means the counter was behind reality: resync it and surface a
    /// retryable conflict instead of silently re-allocating.
    async fn map_insert_error(
        &self,
        tx: Transaction<'_, Postgres>,
        err: sqlx::Error,
        fiscal_type: FiscalDocType,
    ) -> AppError {
        let constraint = match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                db_err.constraint().map(|c| c.to_string())
            }
            _ => None,
        };

        let Some(constraint) = constraint else {
            return AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice: {}", err));
        };

        // The failed statement poisoned the transaction; roll it back before
        // repairing the counter outside of it.
        tx.rollback().await.ok();

        let prefix = if constraint.contains("ncf") {
            fiscal_type
                .series_prefix()
                .unwrap_or(sequence::INVOICE_PREFIX)
        } else {
            sequence::INVOICE_PREFIX
        };

        warn!(
            constraint = %constraint,
            prefix = prefix,
            "Fiscal number collision; resynchronizing sequence"
        );

        if let Err(resync_err) = sequence::resync(self.db.pool(), prefix).await {
            return resync_err;
        }

        AppError::SequenceConflict(prefix.to_string())
    }
}
