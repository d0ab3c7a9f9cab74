//! Error types for the sync core and the authoritative store server.
//!
//! `SyncError` is what collaborators of the sync facade see. `AppError` is
//! the server-side error with its mapping to HTTP status codes and
//! response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";

    pub const REMOTE_READ_ERROR: &str = "REMOTE_READ_ERROR";
    pub const REMOTE_WRITE_ERROR: &str = "REMOTE_WRITE_ERROR";
    pub const CACHE_CODEC_ERROR: &str = "CACHE_CODEC_ERROR";
    pub const MIGRATION_ERROR: &str = "MIGRATION_ERROR";
    pub const INVALID_RECORD: &str = "INVALID_RECORD";
    pub const IMPORT_ERROR: &str = "IMPORT_ERROR";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
}

// ==================== SYNC CORE ====================

/// Errors surfaced by the sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Fetching from the remote store failed (network or permission).
    RemoteRead { path: String, message: String },
    /// Writing to the remote store failed. Retryable; the local cache was
    /// not touched.
    RemoteWrite { path: String, message: String },
    /// Local cache (de)serialization failed. Absorbed inside the cache
    /// layer; only the migrator ever sees it.
    CacheCodec(String),
    /// The one-shot schema upgrade failed. Legacy data is preserved and the
    /// upgrade is retried on the next start.
    Migration(String),
    /// A record failed validation before any write happened.
    InvalidRecord(String),
    /// An import file was rejected before any write happened.
    Import(String),
    /// Configuration is missing or malformed.
    Config(String),
}

impl SyncError {
    pub fn remote_read(path: &str, message: impl Into<String>) -> Self {
        SyncError::RemoteRead {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn remote_write(path: &str, message: impl Into<String>) -> Self {
        SyncError::RemoteWrite {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::RemoteRead { .. } => codes::REMOTE_READ_ERROR,
            SyncError::RemoteWrite { .. } => codes::REMOTE_WRITE_ERROR,
            SyncError::CacheCodec(_) => codes::CACHE_CODEC_ERROR,
            SyncError::Migration(_) => codes::MIGRATION_ERROR,
            SyncError::InvalidRecord(_) => codes::INVALID_RECORD,
            SyncError::Import(_) => codes::IMPORT_ERROR,
            SyncError::Config(_) => codes::CONFIG_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            SyncError::RemoteRead { path, message } => {
                format!("Failed to read {}: {}", path, message)
            }
            SyncError::RemoteWrite { path, message } => {
                format!("Failed to write {}: {}", path, message)
            }
            SyncError::CacheCodec(msg) => msg.clone(),
            SyncError::Migration(msg) => msg.clone(),
            SyncError::InvalidRecord(msg) => msg.clone(),
            SyncError::Import(msg) => msg.clone(),
            SyncError::Config(msg) => msg.clone(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteRead { .. } | SyncError::RemoteWrite { .. }
        )
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for SyncError {}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::CacheCodec(format!("JSON error: {}", err))
    }
}

// ==================== SERVER ====================

/// Server error type.
#[derive(Debug)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// Validation error
    Validation(String),
    /// Database error
    Database(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Database(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub revision_id: i64,
}

impl ErrorResponse {
    pub fn new(error: &AppError, revision_id: i64) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: None,
            },
            revision_id,
        }
    }
}

/// Wrapper type for errors that carry revision_id context.
pub struct AppErrorWithRevision {
    pub error: AppError,
    pub revision_id: i64,
}

impl IntoResponse for AppErrorWithRevision {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.revision_id);
        (status, Json(body)).into_response()
    }
}
