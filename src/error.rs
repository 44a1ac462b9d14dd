//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how domain errors are
//! converted to HTTP responses. WebSocket frames carry their own `error`
//! messages with machine-readable codes; this type covers the REST surface.
//!
//! ## Error Categories:
//! - **Internal**: Server-side problems (500 errors)
//! - **BadRequest**: Client sent invalid data (400 errors)
//! - **NotFound**: Requested resource doesn't exist (404 errors)
//! - **Conflict**: Request clashes with current state (409 errors)
//! - **ConfigError**: Configuration problems (500 errors)
//! - **ValidationError**: Data validation failed (400 errors)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::hub::HubError;

#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (store failures, lock poisoning, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Request conflicts with current server state (e.g. a broadcaster that
    /// is already streaming)
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses with a consistent JSON structure:
///
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "broadcaster com-1 is already streaming",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "conflict",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to
/// 400 rather than 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Domain errors surfacing over the REST API keep their HTTP semantics:
/// lifecycle clashes are 409s, missing sessions and connections are 404s.
impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        match &err {
            HubError::AlreadyStreaming(_) => AppError::Conflict(err.to_string()),
            HubError::NoActiveSession(_) | HubError::UnknownConnection(_) => {
                AppError::NotFound(err.to_string())
            }
            HubError::JoinTimeout | HubError::NegotiationFailed(_) => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_error_status_mapping() {
        let err: AppError = HubError::AlreadyStreaming("com-1".to_string()).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError = HubError::NoActiveSession("com-1".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
