//! Error handling for the Fuel Inventory Ledger
//!
//! Wraps the domain `LedgerError` and renders every failure as
//! `{ "error": { "code", "message", ... } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::LedgerError;
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authorization errors
    #[error("Insufficient permissions: requires {0}")]
    InsufficientPermissions(String),

    #[error("No access to tank {tank_id}")]
    TankAccessDenied { tank_id: Uuid },

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Domain errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        match errors.field_errors().into_iter().next() {
            Some((field, errs)) => AppError::Validation {
                field: field.to_string(),
                message: errs
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field)),
            },
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

impl AppError {
    pub fn not_found(resource: &str, id: Uuid) -> Self {
        AppError::NotFound(format!("{} {}", resource, id))
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize, Default)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tank_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation { .. }
        | LedgerError::InvalidReading { .. }
        | LedgerError::MissingEvidence => StatusCode::BAD_REQUEST,
        LedgerError::InvalidPin { .. } => StatusCode::FORBIDDEN,
        LedgerError::UnknownTank { .. } | LedgerError::UnknownDetail { .. } => {
            StatusCode::NOT_FOUND
        }
        LedgerError::InvalidState { .. } | LedgerError::AlreadyVoided { .. } => {
            StatusCode::CONFLICT
        }
        LedgerError::CapacityExceeded { .. }
        | LedgerError::NegativeStock { .. }
        | LedgerError::NegativeStockOnReversal { .. }
        | LedgerError::TankInactive { .. }
        | LedgerError::ReconciliationRequired { .. }
        | LedgerError::MissingReason { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::InsufficientPermissions(permission) => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new(
                    "INSUFFICIENT_PERMISSIONS",
                    format!("Permission denied: requires {}", permission),
                ),
            ),
            AppError::TankAccessDenied { tank_id } => (
                StatusCode::FORBIDDEN,
                ErrorDetail {
                    tank_id: Some(*tank_id),
                    ..ErrorDetail::new("TANK_ACCESS_DENIED", "You may not operate on this tank")
                },
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    field: Some(field.clone()),
                    ..ErrorDetail::new("VALIDATION_ERROR", message.clone())
                },
            ),
            AppError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg.clone()),
            ),
            AppError::Conflict { resource, message } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    field: Some(resource.clone()),
                    ..ErrorDetail::new("CONFLICT", message.clone())
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::Ledger(err) => (
                ledger_status(err),
                ErrorDetail {
                    code: err.code().to_string(),
                    message: err.to_string(),
                    field: match err {
                        LedgerError::Validation { field, .. } => Some(field.clone()),
                        _ => None,
                    },
                    tank_id: err.tank_id(),
                    detail_id: err.detail_id(),
                    current_state: err.current_state().map(str::to_string),
                },
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred"),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg.clone()),
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", "An internal server error occurred"),
            ),
        };

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_map_to_statuses() {
        let tank_id = Uuid::new_v4();
        assert_eq!(
            ledger_status(&LedgerError::InvalidPin { actor_id: tank_id }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ledger_status(&LedgerError::UnknownTank { tank_id }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ledger_status(&LedgerError::MissingEvidence),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_ledger_error_carries_tank() {
        let tank_id = Uuid::new_v4();
        let response = AppError::from(LedgerError::TankInactive { tank_id }).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
