// =============================================================================
// ERROR MODULE
// =============================================================================
// Service error type and its HTTP mapping.
//
// ERROR HANDLING RULES:
// - Validation, not-found and state errors are raised before any write
// - Database errors abort the surrounding transaction (rollback on drop)
// - Database internals are logged, never returned to the client
// - Notification failures have their own type (notify::NotifyError) and are
//   never turned into an AppError
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::{ErrorResponse, UnknownStatus};

#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // CLIENT ERRORS
    // -------------------------------------------------------------------------
    /// Malformed input: empty item list, non-positive quantity, unknown status
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced order, product or courier does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient stock for product {product_id} size {size_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: i64,
        size_id: i64,
        available: i32,
        requested: i32,
    },

    // -------------------------------------------------------------------------
    // SERVER ERRORS
    // -------------------------------------------------------------------------
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) | AppError::InsufficientStock { .. } => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        let message = match &self {
            AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidState(msg) => msg.clone(),
            AppError::InsufficientStock { .. } => self.to_string(),
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
        };

        if status.is_server_error() {
            // Full detail goes to the log only
            tracing::error!(error_code, error = %self, "Request failed");
        } else {
            tracing::debug!(error_code, message = %message, "Request rejected");
        }

        (status, Json(ErrorResponse::new(error_code, message))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<UnknownStatus> for AppError {
    fn from(err: UnknownStatus) -> Self {
        AppError::Validation(err.to_string())
    }
}
