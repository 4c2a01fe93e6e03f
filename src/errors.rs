use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::TransactionError;
use serde::{Deserialize, Serialize};

/// Error body returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable description naming the failed precondition
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State machine violation: the entity is not in an allowed source
    /// status for the requested transition.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Overpayment rejected: {0}")]
    OverpaymentRejected(String),

    #[error("Invoice closed: {0}")]
    InvoiceAlreadyClosed(String),

    /// Cross-entity gate not met (e.g. delivering before the invoice is
    /// paid).
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Lock wait timed out; the caller may retry the whole operation.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Unwrap the sea-orm transaction wrapper so `?` works on
/// `db.transaction(...)` results inside services.
impl From<TransactionError<ServiceError>> for ServiceError {
    fn from(err: TransactionError<ServiceError>) -> Self {
        match err {
            TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
            TransactionError::Transaction(service_err) => service_err,
        }
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition(_) | Self::InvoiceAlreadyClosed(_) => StatusCode::CONFLICT,
            Self::InsufficientStock(_) | Self::OverpaymentRejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
