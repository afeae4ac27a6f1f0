//! Maintenance endpoints.

use axum::{extract::State, Json};
use service_core::error::AppError;

use super::envelope;
use crate::dtos::{MutationResponse, ReconcileSummary};
use crate::startup::AppState;

/// Idempotent consistency sweep: rebuild every invoice's cached totals and
/// status from the authoritative payment and credit-note records.
pub async fn reconcile_invoices(
    State(state): State<AppState>,
) -> Result<Json<MutationResponse<ReconcileSummary>>, AppError> {
    tracing::info!("Reconciliation sweep requested");

    let result = state.payments.reconcile_all().await;
    if result.is_ok() {
        state.invalidate_views("invoices");
    }
    envelope(result)
}
