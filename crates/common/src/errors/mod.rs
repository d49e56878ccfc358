//! Error types for the deposition engine
//!
//! Provides:
//! - One error enum covering validation, state machine, PID, storage and
//!   infrastructure failures
//! - HTTP status code mapping
//! - Structured error responses with per-field details
//! - Retry classification for the task runtime

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Per-field error messages, keyed by field name
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    InvalidLocalDoi,
    MissingFiles,
    UnchangedFiles,
    PayloadTooLarge,

    // Authentication errors (2xxx)
    Unauthorized,

    // Precondition errors (3xxx)
    Forbidden,
    PreconditionFailed,
    BucketLocked,

    // Resource errors (4xxx)
    NotFound,
    PidNotFound,
    RecordNotFound,
    DepositNotFound,

    // Conflict errors (5xxx)
    Conflict,
    PidAlreadyExists,
    PidAlreadyRegistered,
    PidAlreadyAssigned,
    NotificationAlreadyReceived,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    IntegrityError,

    // External service errors (8xxx)
    UpstreamError,
    ProviderError,
    TransientError,
    QueueError,
    CacheError,
    StorageError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,
            ErrorCode::InvalidLocalDoi => 1003,
            ErrorCode::MissingFiles => 1010,
            ErrorCode::UnchangedFiles => 1011,
            ErrorCode::PayloadTooLarge => 1020,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,

            // Preconditions (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::PreconditionFailed => 3002,
            ErrorCode::BucketLocked => 3003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::PidNotFound => 4002,
            ErrorCode::RecordNotFound => 4003,
            ErrorCode::DepositNotFound => 4004,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::PidAlreadyExists => 5002,
            ErrorCode::PidAlreadyRegistered => 5003,
            ErrorCode::PidAlreadyAssigned => 5004,
            ErrorCode::NotificationAlreadyReceived => 5005,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::IntegrityError => 7003,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::ProviderError => 8002,
            ErrorCode::TransientError => 8003,
            ErrorCode::QueueError => 8004,
            ErrorCode::CacheError => 8005,
            ErrorCode::StorageError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Validation failed for {} field(s)", errors.len())]
    InvalidFields { errors: FieldErrors },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("{message}")]
    InvalidLocalDoi { message: String },

    #[error("Minimum one file must be provided.")]
    MissingFiles,

    #[error("bucket contents unchanged")]
    UnchangedFiles,

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Precondition errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    #[error("Bucket {bucket_id} is locked")]
    BucketLocked { bucket_id: uuid::Uuid },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Persistent identifier not found: {pid_type}:{pid_value}")]
    PidNotFound { pid_type: String, pid_value: String },

    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Deposition not found: {id}")]
    DepositNotFound { id: String },

    // Conflict errors
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Persistent identifier {pid_type}:{pid_value} already exists")]
    PidAlreadyExists { pid_type: String, pid_value: String },

    #[error("Persistent identifier {pid_type}:{pid_value} is already registered")]
    PidAlreadyRegistered { pid_type: String, pid_value: String },

    #[error("Persistent identifier {pid_type}:{pid_value} is already assigned to another object")]
    PidAlreadyAssigned { pid_type: String, pid_value: String },

    #[error("Notification {notification_id} has already been received")]
    NotificationAlreadyReceived { notification_id: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Integrity error: {message}")]
    Integrity { message: String },

    // External service errors
    #[error("Registrar {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Build a validation error for a single field
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let mut errors = FieldErrors::new();
        errors.insert(field, vec![message.into()]);
        AppError::InvalidFields { errors }
    }

    /// Build a not-found error for a resource
    pub fn not_found(resource_type: impl Into<String>, id: impl ToString) -> Self {
        AppError::NotFound {
            resource_type: resource_type.into(),
            id: id.to_string(),
        }
    }

    /// Build a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        AppError::Precondition {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFields { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InvalidLocalDoi { .. } => ErrorCode::InvalidLocalDoi,
            AppError::MissingFiles => ErrorCode::MissingFiles,
            AppError::UnchangedFiles => ErrorCode::UnchangedFiles,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::Precondition { .. } => ErrorCode::PreconditionFailed,
            AppError::BucketLocked { .. } => ErrorCode::BucketLocked,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::PidNotFound { .. } => ErrorCode::PidNotFound,
            AppError::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            AppError::DepositNotFound { .. } => ErrorCode::DepositNotFound,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::PidAlreadyExists { .. } => ErrorCode::PidAlreadyExists,
            AppError::PidAlreadyRegistered { .. } => ErrorCode::PidAlreadyRegistered,
            AppError::PidAlreadyAssigned { .. } => ErrorCode::PidAlreadyAssigned,
            AppError::NotificationAlreadyReceived { .. } => {
                ErrorCode::NotificationAlreadyReceived
            }
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Integrity { .. } => ErrorCode::IntegrityError,
            AppError::Provider { .. } => ErrorCode::ProviderError,
            AppError::Transient { .. } => ErrorCode::TransientError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::InvalidFields { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InvalidLocalDoi { .. }
            | AppError::MissingFiles
            | AppError::UnchangedFiles => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. }
            | AppError::Precondition { .. }
            | AppError::BucketLocked { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::PidNotFound { .. }
            | AppError::RecordNotFound { .. }
            | AppError::DepositNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict { .. }
            | AppError::PidAlreadyExists { .. }
            | AppError::PidAlreadyRegistered { .. }
            | AppError::PidAlreadyAssigned { .. }
            | AppError::NotificationAlreadyReceived { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Integrity { .. }
            | AppError::Storage { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Provider { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Transient { .. }
            | AppError::QueueError { .. }
            | AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Whether the task runtime should retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Provider { .. }
                | AppError::Transient { .. }
                | AppError::QueueError { .. }
                | AppError::CacheError { .. }
                | AppError::HttpClient(_)
                | AppError::DatabaseConnection { .. }
        )
    }

    /// Per-field details attached to the error response
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::InvalidFields { errors } => serde_json::to_value(errors).ok(),
            AppError::Validation {
                message,
                field: Some(field),
            } => Some(serde_json::json!({ field.as_str(): [message] })),
            AppError::InvalidLocalDoi { message } => Some(serde_json::json!({ "doi": [message] })),
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: self.details(),
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<sea_orm::TransactionError<AppError>> for AppError {
    fn from(err: sea_orm::TransactionError<AppError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(e) => AppError::Database(e),
            sea_orm::TransactionError::Transaction(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::RecordNotFound { id: "42".into() };
        assert_eq!(err.code(), ErrorCode::RecordNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_field_error_details() {
        let err = AppError::field("title", "Field is required.");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());

        let details = err.details().unwrap();
        assert_eq!(details["title"][0], "Field is required.");
    }

    #[test]
    fn test_precondition_is_forbidden() {
        let err = AppError::precondition("deposition is published");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = AppError::BucketLocked {
            bucket_id: uuid::Uuid::new_v4(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_classification() {
        let err = AppError::Provider {
            provider: "datacite".into(),
            message: "timeout".into(),
        };
        assert!(err.is_retryable());
        assert!(err.is_server_error());

        let err = AppError::Integrity {
            message: "two recids".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unchanged_files_message() {
        assert_eq!(AppError::UnchangedFiles.to_string(), "bucket contents unchanged");
        assert_eq!(
            AppError::MissingFiles.to_string(),
            "Minimum one file must be provided."
        );
    }
}
