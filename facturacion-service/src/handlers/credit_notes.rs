//! Credit note endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::envelope;
use crate::dtos::{
    CreateCreditNoteRequest, CreditNoteWithItems, MutationResponse, UpdateCreditNoteRequest,
};
use crate::startup::AppState;

pub async fn create_credit_note(
    State(state): State<AppState>,
    Json(payload): Json<CreateCreditNoteRequest>,
) -> Result<Json<MutationResponse<CreditNoteWithItems>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(invoice_id = %payload.invoice_id, items = payload.items.len(), "Issuing credit note");

    let result = state.credit_notes.create(&payload).await;
    if result.is_ok() {
        state.invalidate_views("credit_notes");
    }
    envelope(result)
}

pub async fn update_credit_note(
    State(state): State<AppState>,
    Path(credit_note_id): Path<Uuid>,
    Json(payload): Json<UpdateCreditNoteRequest>,
) -> Result<Json<MutationResponse<CreditNoteWithItems>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(credit_note_id = %credit_note_id, "Updating credit note");

    let result = state.credit_notes.update(credit_note_id, &payload).await;
    if result.is_ok() {
        state.invalidate_views("credit_notes");
    }
    envelope(result)
}

pub async fn delete_credit_note(
    State(state): State<AppState>,
    Path(credit_note_id): Path<Uuid>,
) -> Result<Json<MutationResponse<String>>, AppError> {
    tracing::info!(credit_note_id = %credit_note_id, "Deleting credit note");

    let result = state
        .credit_notes
        .delete(credit_note_id)
        .await
        .map(|_| "Credit note deleted".to_string());
    if result.is_ok() {
        state.invalidate_views("credit_notes");
    }
    envelope(result)
}

pub async fn get_credit_note(
    State(state): State<AppState>,
    Path(credit_note_id): Path<Uuid>,
) -> Result<Json<CreditNoteWithItems>, AppError> {
    let detail = state.credit_notes.detail(credit_note_id).await?;
    Ok(Json(detail))
}
