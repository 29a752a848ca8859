//! Error types for the document pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Illegal transition or bad request
    #[error("Validation error: {0}")]
    Validation(String),

    /// A task is already active for the document
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Document or artifact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// External collaborator (blob store, extraction service, LLM) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Poll budget exhausted
    #[error("timeout: job {job_id} still pending after {attempts} poll attempts")]
    Timeout { job_id: String, attempts: u32 },

    /// Downloading or writing the extracted artifact failed
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// User-requested stop; not a failure
    #[error("Canceled")]
    Canceled,

    /// Record store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a collaborator error
    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator(message.into())
    }

    /// Create a materialization error
    pub fn materialization(message: impl Into<String>) -> Self {
        Self::Materialization(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error is a user-requested stop rather than a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Text recorded as a document's `last_error`
    pub fn reason(&self) -> String {
        match self {
            Error::Collaborator(msg) | Error::Materialization(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Collaborator(_) => (StatusCode::BAD_GATEWAY, "collaborator_error"),
            Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Materialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "materialization_error")
            }
            Error::Canceled => (StatusCode::CONFLICT, "canceled"),
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
