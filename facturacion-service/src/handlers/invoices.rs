//! Invoice endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::envelope;
use crate::dtos::{
    CreateInvoiceRequest, InvoiceDetail, InvoiceListQuery, InvoiceSummary, InvoiceWithItems,
    MutationResponse, UpdateInvoiceRequest,
};
use crate::startup::AppState;

/// Create an invoice. Validation failures are reported through the envelope
/// before any transaction starts.
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<Json<MutationResponse<InvoiceWithItems>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(client_id = %payload.client_id, items = payload.items.len(), "Creating invoice");

    let result = state.invoices.create(&payload).await;
    if result.is_ok() {
        state.invalidate_views("invoices");
    }
    envelope(result)
}

/// Replace an invoice's header and items.
pub async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> Result<Json<MutationResponse<InvoiceWithItems>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(invoice_id = %invoice_id, "Updating invoice");

    let result = state.invoices.update(invoice_id, &payload).await;
    if result.is_ok() {
        state.invalidate_views("invoices");
    }
    envelope(result)
}

/// Delete an invoice with its cascade (payments, credit notes, movements).
pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<MutationResponse<String>>, AppError> {
    tracing::info!(invoice_id = %invoice_id, "Deleting invoice");

    let result = state
        .invoices
        .delete(invoice_id)
        .await
        .map(|_| "Invoice deleted".to_string());
    if result.is_ok() {
        state.invalidate_views("invoices");
    }
    envelope(result)
}

/// Period listing with the read-time status derivation.
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceListQuery>,
) -> Result<Json<Vec<InvoiceSummary>>, AppError> {
    let today = chrono::Utc::now().date_naive();
    let invoices = state
        .invoices
        .list(&filter)
        .await?
        .into_iter()
        .map(|invoice| {
            let display_status = invoice.display_status(today).to_string();
            InvoiceSummary {
                invoice,
                display_status,
            }
        })
        .collect();
    Ok(Json(invoices))
}

/// Full invoice view with items, payments and credit notes.
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    let detail = state.invoices.detail(invoice_id).await?;
    Ok(Json(detail))
}
