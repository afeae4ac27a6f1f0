//! Payment endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::envelope;
use crate::dtos::{CreatePaymentRequest, MutationResponse, UpdatePaymentRequest};
use crate::models::Payment;
use crate::startup::AppState;

pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<MutationResponse<Payment>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(invoice_id = %payload.invoice_id, amount = %payload.amount, "Registering payment");

    let result = state.payments.create_payment(&payload).await;
    if result.is_ok() {
        state.invalidate_views("payments");
    }
    envelope(result)
}

pub async fn update_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentRequest>,
) -> Result<Json<MutationResponse<Payment>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(payment_id = %payment_id, "Updating payment");

    let result = state.payments.update_payment(payment_id, &payload).await;
    if result.is_ok() {
        state.invalidate_views("payments");
    }
    envelope(result)
}

pub async fn delete_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<MutationResponse<String>>, AppError> {
    tracing::info!(payment_id = %payment_id, "Deleting payment");

    let result = state
        .payments
        .delete_payment(payment_id)
        .await
        .map(|_| "Payment deleted".to_string());
    if result.is_ok() {
        state.invalidate_views("payments");
    }
    envelope(result)
}
