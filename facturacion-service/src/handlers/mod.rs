//! HTTP surface. Ledger mutations answer with the uniform
//! `{success, data | message}` envelope: domain failures (validation, stock
//! shortfalls, sequence conflicts, missing documents) are translated here,
//! infrastructure failures propagate as HTTP errors.

pub mod clients;
pub mod credit_notes;
pub mod inventory;
pub mod invoices;
pub mod maintenance;
pub mod payments;
pub mod products;

use crate::dtos::MutationResponse;
use crate::services::metrics::ERRORS_TOTAL;
use axum::Json;
use service_core::error::AppError;

/// Fold a ledger operation's outcome into the mutation envelope.
pub(crate) fn envelope<T>(
    result: Result<T, AppError>,
) -> Result<Json<MutationResponse<T>>, AppError> {
    match result {
        Ok(data) => Ok(Json(MutationResponse::ok(data))),
        Err(err) if err.is_domain_failure() => {
            ERRORS_TOTAL
                .with_label_values(&[error_label(&err)])
                .inc();
            Ok(Json(MutationResponse::fail(err.to_string())))
        }
        Err(err) => {
            ERRORS_TOTAL
                .with_label_values(&[error_label(&err)])
                .inc();
            Err(err)
        }
    }
}

fn error_label(err: &AppError) -> &'static str {
    match err {
        AppError::ValidationError(_) => "validation",
        AppError::BadRequest(_) => "bad_request",
        AppError::NotFound(_) => "not_found",
        AppError::Conflict(_) => "conflict",
        AppError::InsufficientStock(_) => "insufficient_stock",
        AppError::SequenceConflict(_) => "sequence_conflict",
        AppError::DatabaseError(_) => "database",
        _ => "internal",
    }
}
