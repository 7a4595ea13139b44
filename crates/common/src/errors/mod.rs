//! Error types for ChunkForge services
//!
//! Provides a single error taxonomy shared by the pipeline and its surfaces:
//! - Distinct variants for configuration, transient, and invariant failures
//! - Retry classification for the embedding path
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MalformedInput,

    // Resource errors (4xxx)
    NotFound,
    CollectionNotFound,

    // External service errors (8xxx)
    TransientServiceError,
    EmbeddingFailed,
    VectorStoreError,
    GenerationError,
    SourceError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    MalformedBatch,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MalformedInput => 1002,

            ErrorCode::NotFound => 4001,
            ErrorCode::CollectionNotFound => 4002,

            ErrorCode::TransientServiceError => 8001,
            ErrorCode::EmbeddingFailed => 8002,
            ErrorCode::VectorStoreError => 8003,
            ErrorCode::GenerationError => 8004,
            ErrorCode::SourceError => 8005,
            ErrorCode::UpstreamError => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::MalformedBatch => 9003,
            ErrorCode::SerializationError => 9004,
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

    /// The remote capability rejected the input itself. Never retried.
    #[error("Malformed input rejected by {service}: {message}")]
    MalformedInput { service: String, message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Collection '{name}' not found; run an ingestion for this method first")]
    CollectionNotFound { name: String },

    // External service errors
    /// Rate limiting, timeouts, connection failures, 5xx responses.
    #[error("Transient error from {service}: {message}")]
    TransientService { service: String, message: String },

    #[error(
        "Embedding failed for batch {batch_index} of {} after {attempts} attempts: {message}",
        .collection.as_deref().unwrap_or("an unnamed run")
    )]
    EmbeddingFailed {
        /// Collection the run was going to replace, once known
        collection: Option<String>,
        batch_index: usize,
        attempts: u32,
        message: String,
    },

    #[error("Vector store error on '{collection}': {message}")]
    VectorStore { collection: String, message: String },

    #[error("Generation error: {message}")]
    Generation { message: String },

    #[error("Document source error: {message}")]
    Source { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Parallel arrays disagree in length. Always a defect.
    #[error("Malformed batch for '{collection}': {message}")]
    MalformedBatch { collection: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a field-less validation error
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Attach the target collection to an embedding failure. Other errors pass through.
    pub fn for_collection(self, name: &str) -> Self {
        match self {
            AppError::EmbeddingFailed {
                batch_index,
                attempts,
                message,
                ..
            } => AppError::EmbeddingFailed {
                collection: Some(name.to_string()),
                batch_index,
                attempts,
                message,
            },
            other => other,
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MalformedInput { .. } => ErrorCode::MalformedInput,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::CollectionNotFound { .. } => ErrorCode::CollectionNotFound,
            AppError::TransientService { .. } => ErrorCode::TransientServiceError,
            AppError::EmbeddingFailed { .. } => ErrorCode::EmbeddingFailed,
            AppError::VectorStore { .. } => ErrorCode::VectorStoreError,
            AppError::Generation { .. } => ErrorCode::GenerationError,
            AppError::Source { .. } => ErrorCode::SourceError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::MalformedBatch { .. } => ErrorCode::MalformedBatch,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the embedding path may retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::TransientService { .. } => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::MalformedInput { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::NotFound { .. } | AppError::CollectionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            // 500 Internal Server Error
            AppError::Configuration { .. }
            | AppError::MalformedBatch { .. }
            | AppError::Internal { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingFailed { .. }
            | AppError::VectorStore { .. }
            | AppError::Generation { .. }
            | AppError::Source { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::TransientService { .. } => StatusCode::SERVICE_UNAVAILABLE,
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
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

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
                numeric_code: code.as_code(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Source {
            message: err.to_string(),
        }
    }
}
