//! Error handling module
//!
//! Provides unified error types and handling for the entire application.
//! Policy rejections carry stable messages; collaborator failures are logged
//! here and reach the caller only as a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Too many failed attempts. Please try again later.")]
    LockedOut,

    #[error("Identity provider token is invalid")]
    InvalidAssertion,

    #[error("Only organisation accounts are allowed")]
    DomainNotAllowed,

    #[error("Federated login is not enabled")]
    FederationDisabled,

    #[error("Reset token is invalid or expired")]
    InvalidToken,

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// HTTP status and stable machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidCredentials => (StatusCode::BAD_REQUEST, "INVALID_CREDENTIALS"),
            AppError::LockedOut => (StatusCode::TOO_MANY_REQUESTS, "LOCKED_OUT"),
            AppError::InvalidAssertion => (StatusCode::UNAUTHORIZED, "INVALID_ASSERTION"),
            AppError::DomainNotAllowed => (StatusCode::FORBIDDEN, "DOMAIN_NOT_ALLOWED"),
            AppError::FederationDisabled => (StatusCode::NOT_FOUND, "FEDERATION_DISABLED"),
            AppError::InvalidToken => (StatusCode::BAD_REQUEST, "INVALID_TOKEN"),
            AppError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Pool(_) => (StatusCode::SERVICE_UNAVAILABLE, "POOL_EXHAUSTED"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        }
    }

    /// Message shown to the caller
    pub fn public_message(&self) -> String {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Pool(_) => "Database connection pool exhausted".to_string(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
            AppError::Config(_) => "A configuration error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => error!("Database error: {:?}", e),
            AppError::Pool(e) => error!("Pool error: {:?}", e),
            AppError::Internal(msg) => error!("Internal error: {}", msg),
            AppError::Config(msg) => error!("Configuration error: {}", msg),
            _ => {}
        }

        let (status, code) = self.status_and_code();
        let body = Json(ErrorResponse {
            success: false,
            message: self.public_message(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}
