use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// One product line that cannot be served from current stock.
#[derive(Debug, Clone, Serialize)]
pub struct StockShortage {
    pub product_id: Uuid,
    pub product_name: String,
    pub requested: Decimal,
    pub available: Decimal,
}

fn format_shortages(shortages: &[StockShortage]) -> String {
    let lines: Vec<String> = shortages
        .iter()
        .map(|s| {
            format!(
                "{} (requested {}, available {})",
                s.product_name, s.requested, s.available
            )
        })
        .collect();
    format!("Insufficient stock: {}", lines.join("; "))
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    /// All offending items of one failed availability check. Nothing is
    /// written when this is raised.
    #[error("{}", format_shortages(.0))]
    InsufficientStock(Vec<StockShortage>),

    /// A fiscal number collided with an already-persisted document. The
    /// counter has been resynchronized; the operation is safe to resubmit.
    #[error("Fiscal sequence conflict for series '{0}'; counter resynchronized, retry the operation")]
    SequenceConflict(String),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Domain failures are translated into the mutation envelope at the HTTP
    /// boundary; everything else propagates as a server error response.
    pub fn is_domain_failure(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_)
                | AppError::BadRequest(_)
                | AppError::NotFound(_)
                | AppError::Conflict(_)
                | AppError::InsufficientStock(_)
                | AppError::SequenceConflict(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(serde_json::Value::String(err.to_string())),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::InsufficientStock(ref shortages) => (
                StatusCode::CONFLICT,
                self.to_string(),
                serde_json::to_value(shortages).ok(),
            ),
            AppError::SequenceConflict(_) => (StatusCode::CONFLICT, self.to_string(), None),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(serde_json::Value::String(format!("{:#}", err))),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(serde_json::Value::String(err.to_string())),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(serde_json::Value::String(err.to_string())),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
