use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ThrottlerError {
    /// The caller asked to charge a zero or negative cost.
    #[error("Invalid cost {0}: cost must be a positive integer")]
    InvalidCost(i64),

    #[error("Failed to resolve client identity: {0}")]
    IdentityResolutionFailed(String),

    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Only ever reported through logs and metrics, never returned from `evaluate`.
    #[error("Scheduled window reset failed: {0}")]
    SchedulerResetFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::StoreUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ThrottlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ThrottlerError::ValidationError(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub description: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, description: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            description: description.to_string(),
            code,
        }
    }

    pub fn from_throttler_error(err: &ThrottlerError) -> Self {
        let description = err.to_string();
        match err {
            ThrottlerError::InvalidCost(_) => Self::new("invalid_cost", &description, 500),
            ThrottlerError::IdentityResolutionFailed(_) => {
                Self::new("identity_unresolved", &description, 401)
            }
            ThrottlerError::StoreUnavailable(_) => {
                Self::new("service_unavailable", &description, 503)
            }
            ThrottlerError::SchedulerResetFailed(_) => {
                Self::new("internal_error", &description, 500)
            }
            ThrottlerError::Configuration(_) => {
                Self::new("configuration_error", &description, 500)
            }
            ThrottlerError::ValidationError(_) => {
                Self::new("validation_error", &description, 422)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        ErrorResponse::from_throttler_error(&self).into_response()
    }
}
