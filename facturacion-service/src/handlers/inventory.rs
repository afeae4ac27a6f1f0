//! Inventory endpoints: manual adjustments and the movement audit trail.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use super::envelope;
use crate::dtos::{MovementListQuery, MutationResponse, StockAdjustmentRequest};
use crate::models::InventoryMovement;
use crate::services::stock;
use crate::startup::AppState;

/// Manual restock or correction, recorded in the movement history.
pub async fn adjust_stock(
    State(state): State<AppState>,
    Json(payload): Json<StockAdjustmentRequest>,
) -> Result<Json<MutationResponse<InventoryMovement>>, AppError> {
    if let Err(e) = payload.validate_request() {
        return envelope(Err(e));
    }

    tracing::info!(
        product_id = %payload.product_id,
        movement_type = %payload.movement_type,
        quantity = %payload.quantity,
        "Manual stock adjustment"
    );

    let result = stock::manual_adjustment(&state.db, &payload).await;
    if result.is_ok() {
        state.invalidate_views("inventory");
    }
    envelope(result)
}

/// Movement history, filterable by product or document reference.
pub async fn list_movements(
    State(state): State<AppState>,
    Query(filter): Query<MovementListQuery>,
) -> Result<Json<Vec<InventoryMovement>>, AppError> {
    Ok(Json(state.db.list_movements(&filter).await?))
}
