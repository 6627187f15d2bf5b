//! Error types and handling
//!
//! Domain errors are raised by the services; the API layer converts all of
//! them into [`AppError`], which renders a consistent JSON response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::services::orchestrator::TaskError;
use crate::services::wapi::ClientError;

/// A single attribute value that does not satisfy its declared type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueViolation {
    pub cidr: String,
    pub attribute: String,
    pub reason: String,
}

/// Input rejected before any remote call is made
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid CIDR '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("Duplicate CIDR {cidr} (records {first} and {second})")]
    DuplicateCidr {
        cidr: String,
        first: usize,
        second: usize,
    },

    #[error("Tag '{tag}' is mapped to unknown authority attribute '{attribute}'")]
    UnknownAttribute { tag: String, attribute: String },

    #[error("Authority attribute '{attribute}' is targeted by several tags: {}", tags.join(", "))]
    SharedTarget { attribute: String, tags: Vec<String> },

    #[error("Invalid attribute name '{name}': {reason}")]
    InvalidAttributeName { name: String, reason: String },

    #[error("{} attribute value(s) failed type validation", violations.len())]
    InvalidValues { violations: Vec<ValueViolation> },

    #[error("Network view must not be empty")]
    EmptyView,

    #[error("{count} records exceed the per-request limit of {limit}")]
    TooManyRecords { count: usize, limit: usize },
}

impl ValidationError {
    /// Structured detail for the error response, where one exists
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ValidationError::InvalidValues { violations } => serde_json::to_value(violations).ok(),
            ValidationError::DuplicateCidr { cidr, first, second } => Some(serde_json::json!({
                "cidr": cidr,
                "positions": [first, second],
            })),
            ValidationError::SharedTarget { attribute, tags } => Some(serde_json::json!({
                "attribute": attribute,
                "tags": tags,
            })),
            _ => None,
        }
    }
}

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unprocessable entity - validation failed (422)
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Request body failed field validation (422)
    #[error("Validation error: {0}")]
    InvalidInput(String),

    /// DDI authority communication error (502/504)
    #[error("DDI authority error: {0}")]
    Authority(#[from] ClientError),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Error code for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            code: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, should_log) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", false),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", false),
            AppError::Validation(_) | AppError::InvalidInput(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", false)
            }
            AppError::Authority(err) if err.is_timeout() => {
                (StatusCode::GATEWAY_TIMEOUT, "authority_timeout", true)
            }
            AppError::Authority(_) => (StatusCode::BAD_GATEWAY, "authority_error", true),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", true),
            AppError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", true)
            }
        };

        if should_log {
            error!(error = %self, error_type = error_type, "Request error");
        }

        let mut body = ErrorResponse::new(error_type, self.to_string());
        match &self {
            AppError::Validation(err) => {
                if let Some(details) = err.details() {
                    body = body.with_details(details);
                }
            }
            AppError::Authority(err) => {
                body = body.with_details(serde_json::json!({
                    "status": err.status(),
                    "retryable": err.is_retryable(),
                }));
                if let Some(code) = err.code() {
                    body = body.with_code(code);
                }
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => AppError::NotFound(format!("Task {} not found", id)),
            TaskError::AlreadyFinished(id) => {
                AppError::BadRequest(format!("Task {} has already finished", id))
            }
            TaskError::ShuttingDown => {
                AppError::ServiceUnavailable("Task orchestrator is shutting down".to_string())
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
