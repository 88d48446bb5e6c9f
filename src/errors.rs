use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or missing API token")]
    Unauthorized,

    /// A credential matched a record whose `expires_at` has passed. Rendered
    /// identically to `Unauthorized` so the response does not reveal which
    /// tokens once existed.
    #[error("token expired")]
    ExpiredToken,

    #[error("administrator token required")]
    AdminRequired,

    #[error("the provided token does not grant access to the requested database")]
    ScopeMismatch,

    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },

    #[error("the provided record identifier is invalid")]
    InvalidRecordId,

    #[error("at least one field must be provided for update")]
    EmptyUpdate,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, message: &'static str) -> Self {
        AppError::Validation { field, message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            // Unauthorized and ExpiredToken must be indistinguishable on the
            // wire to avoid a credential-probing oracle.
            AppError::Unauthorized | AppError::ExpiredToken => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                "invalid or missing API token".to_string(),
            ),
            AppError::AdminRequired => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "admin_required",
                "administrator token required".to_string(),
            ),
            AppError::ScopeMismatch => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "scope_mismatch",
                self.to_string(),
            ),
            AppError::Validation { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "validation_failed",
                self.to_string(),
            ),
            AppError::InvalidRecordId => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "invalid_record_id",
                self.to_string(),
            ),
            AppError::EmptyUpdate => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "empty_update",
                self.to_string(),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "duplicate_token",
                msg.clone(),
            ),
            AppError::Unavailable(msg) => {
                tracing::error!("infrastructure failure: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable_error",
                    "service_unavailable",
                    msg.clone(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("MongoDB error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
