//! Fiscal sequence allocator.
//!
//! One cursor per document series, advanced with a single atomic
//! find-and-increment statement inside the caller's transaction. A rolled
//! back operation returns the cursor value with it, so the series stays
//! gapless unless a document is deleted (which triggers resync).

use crate::services::metrics::SEQUENCE_RESYNCS_TOTAL;
use service_core::error::AppError;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument};

/// Internal invoice document series ("FAC-000123").
pub const INVOICE_PREFIX: &str = "FAC";
/// Internal credit-note document series ("NC-000045").
pub const CREDIT_NOTE_PREFIX: &str = "NC";
/// NCF series used by credit notes.
pub const CREDIT_NOTE_NCF_SERIES: &str = "B04";

/// Atomically advance the cursor for `prefix` and return the new value.
///
/// Never read-then-write: the increment happens in one statement so two
/// racing allocations can never observe the same value.
pub async fn next_value(
    tx: &mut Transaction<'_, Postgres>,
    prefix: &str,
) -> Result<i64, AppError> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO fiscal_sequences (prefix, current_value)
        VALUES ($1, 1)
        ON CONFLICT (prefix)
        DO UPDATE SET current_value = fiscal_sequences.current_value + 1
        RETURNING current_value
        "#,
    )
    .bind(prefix)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!(
            "Failed to allocate sequence '{}': {}",
            prefix,
            e
        ))
    })?;

    Ok(value)
}

/// Internal document number, e.g. "FAC-000123".
pub fn format_document_number(prefix: &str, value: i64) -> String {
    format!("{}-{:06}", prefix, value)
}

/// Fiscal number, e.g. "B0200000017".
pub fn format_ncf(series: &str, value: i64) -> String {
    format!("{}{:08}", series, value)
}

/// Reset a series cursor to the highest sequence actually persisted.
///
/// Called after a unique violation on a fiscal number (a stale cursor) and
/// after document deletion (a vacated slot). The failed operation itself is
/// surfaced to the caller as retryable; it is never retried here, so one
/// logical request can never consume two numbers.
#[instrument(skip(pool))]
pub async fn resync(pool: &PgPool, prefix: &str) -> Result<i64, AppError> {
    let max_in_use: i64 = max_sequence_in_use(pool, prefix).await?;

    sqlx::query(
        r#"
        INSERT INTO fiscal_sequences (prefix, current_value)
        VALUES ($1, $2)
        ON CONFLICT (prefix) DO UPDATE SET current_value = EXCLUDED.current_value
        "#,
    )
    .bind(prefix)
    .bind(max_in_use)
    .execute(pool)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!(
            "Failed to resync sequence '{}': {}",
            prefix,
            e
        ))
    })?;

    SEQUENCE_RESYNCS_TOTAL.with_label_values(&[prefix]).inc();
    info!(prefix = prefix, current_value = max_in_use, "Fiscal sequence resynchronized");

    Ok(max_in_use)
}

/// Highest sequence value persisted for a series, scanning the collection
/// that owns it.
async fn max_sequence_in_use(pool: &PgPool, prefix: &str) -> Result<i64, AppError> {
    let query = match prefix {
        // "FAC-000123" -> numeric suffix after the dash.
        INVOICE_PREFIX => sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(CAST(SUBSTRING(invoice_number FROM 5) AS BIGINT)), 0)
            FROM invoices
            WHERE invoice_number LIKE 'FAC-%'
            "#,
        ),
        // "NC-000045".
        CREDIT_NOTE_PREFIX => sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(CAST(SUBSTRING(credit_note_number FROM 4) AS BIGINT)), 0)
            FROM credit_notes
            WHERE credit_note_number LIKE 'NC-%'
            "#,
        ),
        // Credit-note NCF series lives on credit_notes; every other NCF
        // series lives on invoices. Format "B0400000007": digits from the
        // fourth character.
        CREDIT_NOTE_NCF_SERIES => sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(CAST(SUBSTRING(ncf FROM 4) AS BIGINT)), 0)
            FROM credit_notes
            WHERE ncf LIKE $1
            "#,
        )
        .bind(format!("{}%", prefix)),
        _ => sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(CAST(SUBSTRING(ncf FROM 4) AS BIGINT)), 0)
            FROM invoices
            WHERE ncf LIKE $1
            "#,
        )
        .bind(format!("{}%", prefix)),
    };

    query.fetch_one(pool).await.map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!(
            "Failed to scan max sequence for '{}': {}",
            prefix,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_number_is_zero_padded() {
        assert_eq!(format_document_number(INVOICE_PREFIX, 7), "FAC-000007");
        assert_eq!(format_document_number(CREDIT_NOTE_PREFIX, 123), "NC-000123");
    }

    #[test]
    fn ncf_is_series_plus_eight_digits() {
        assert_eq!(format_ncf("B02", 17), "B0200000017");
        assert_eq!(format_ncf("B04", 1), "B0400000001");
        assert_eq!(format_ncf("B01", 99_999_999), "B0199999999");
    }
}
