//! Centralized API error handling for RideLink
//!
//! This module provides a unified error type for API responses with proper
//! HTTP status code mapping and JSON error responses. The taxonomy separates
//! operational errors (surfaced unchanged to the caller) from programmer
//! errors (logged, returned as a generic internal error).

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("Failed to acquire lock: {0}")]
    LockFailed(String),

    /// Transaction-level conflict (serialization failure, deadlock). Eligible
    /// for automatic retry before it surfaces as a 409.
    #[error("Transaction conflict: {0}")]
    TxConflict(String),

    /// Carries the whole seconds until the caller's bucket refills
    #[error("Too many requests")]
    RateLimited(u64),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error details in the response envelope
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetails,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            ApiError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            ApiError::LockFailed(_) => "LOCK_FAILED",
            ApiError::TxConflict(_) => "CONFLICT",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            // Rejected guards are client errors: the requested transition is
            // not legal from the current state.
            ApiError::InvalidStateTransition(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_)
            | ApiError::IdempotencyConflict(_)
            | ApiError::LockFailed(_)
            | ApiError::TxConflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the error is a transient transaction conflict worth retrying
    /// inside the server (serialization failure / deadlock).
    pub fn is_tx_retryable(&self) -> bool {
        matches!(self, ApiError::TxConflict(_))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = match &self {
            // Programmer errors keep their detail in the logs only.
            ApiError::Internal(_) | ApiError::Database(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        match &self {
            ApiError::Internal(_) | ApiError::Database(_) | ApiError::ServiceUnavailable(_) => {
                tracing::error!(error = %self, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %self, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorBody {
            success: false,
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        if let ApiError::RateLimited(retry_after_secs) = self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.max(1).to_string())],
                Json(body),
            )
                .into_response();
        }

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // lock_not_available: FOR UPDATE NOWAIT lost the race
                Some("55P03") => {
                    ApiError::Conflict("Row is locked by a concurrent request".to_string())
                }
                // serialization_failure / deadlock_detected: retryable
                Some("40001") | Some("40P01") => ApiError::TxConflict(db.message().to_string()),
                // unique_violation
                Some("23505") => ApiError::Conflict(db.message().to_string()),
                _ => ApiError::Database(err.to_string()),
            },
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::ServiceUnavailable(format!("Redis: {}", err))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::InvalidStateTransition("test".to_string()).error_code(),
            "INVALID_STATE_TRANSITION"
        );
        assert_eq!(
            ApiError::LockFailed("test".to_string()).error_code(),
            "LOCK_FAILED"
        );
        assert_eq!(ApiError::RateLimited(1).error_code(), "RATE_LIMITED");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidStateTransition("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("test".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::LockFailed("test".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited(1).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_tx_retryable() {
        assert!(ApiError::TxConflict("x".to_string()).is_tx_retryable());
        assert!(!ApiError::Conflict("x".to_string()).is_tx_retryable());
        assert!(!ApiError::Database("x".to_string()).is_tx_retryable());
    }
}
