//! Error types for Solidafy Sync
//!
//! This module defines the error hierarchy for the whole sync core.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//! `Error::kind()` classifies every variant into the partition-level
//! handling buckets used by the engine.

use thiserror::Error;

/// The main error type for Solidafy Sync
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // ============================================================================
    // Upstream Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited, retry after {}", retry_after_display(.retry_after_seconds))]
    RateLimited { retry_after_seconds: Option<u64> },

    #[error("Rate limit retries exhausted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Max retries ({max_retries}) exceeded: {last_error}")]
    MaxRetriesExceeded { max_retries: u32, last_error: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Change token expired for partition '{partition}'")]
    TokenExpired { partition: String },

    #[error("Permission denied for partition '{partition}': {message}")]
    PermissionDenied { partition: String, message: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // Engine Errors
    // ============================================================================
    #[error("Stream '{stream}' not found")]
    StreamNotFound { stream: String },

    #[error("Export job '{job_id}' error: {message}")]
    ExportJob { job_id: String, message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

fn retry_after_display(seconds: &Option<u64>) -> String {
    match seconds {
        Some(s) => format!("{s}s"),
        None => "backoff".to_string(),
    }
}

/// Classification of errors into handling buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure, timeout or 5xx; retried on the backoff ladder
    Transient,
    /// Upstream asked us to slow down; retried on its own counter
    RateLimited,
    /// Change-feed token no longer valid; triggers a full fetch
    TokenExpired,
    /// Partition is skipped for this run
    PermissionDenied,
    /// Response shape is unusable; never retried
    MalformedResponse,
    /// Invalid settings; aborts before any network call
    Configuration,
    /// Persisted state could not be read or written
    State,
    /// Anything else
    Other,
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create a token expired error
    pub fn token_expired(partition: impl Into<String>) -> Self {
        Self::TokenExpired {
            partition: partition.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(partition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            partition: partition.into(),
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create an export job error
    pub fn export_job(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExportJob {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } | Error::InvalidConfigValue { .. } | Error::YamlParse(_) => {
                ErrorKind::Configuration
            }
            Error::Http(e) => {
                if e.is_decode() {
                    ErrorKind::MalformedResponse
                } else {
                    ErrorKind::Transient
                }
            }
            Error::Timeout { .. } => ErrorKind::Transient,
            Error::HttpStatus { status, .. } => {
                if *status == 429 {
                    ErrorKind::RateLimited
                } else if matches!(status, 401 | 403) {
                    ErrorKind::PermissionDenied
                } else if is_retryable_status(*status) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Other
                }
            }
            Error::RateLimited { .. } | Error::RateLimitExhausted { .. } => ErrorKind::RateLimited,
            Error::MaxRetriesExceeded { .. } => ErrorKind::Transient,
            Error::TokenExpired { .. } => ErrorKind::TokenExpired,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::MalformedResponse { .. } | Error::JsonParse(_) => ErrorKind::MalformedResponse,
            Error::State { .. } | Error::Io(_) => ErrorKind::State,
            Error::InvalidUrl(_) => ErrorKind::Configuration,
            Error::StreamNotFound { .. }
            | Error::ExportJob { .. }
            | Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Check if this error is retryable
    ///
    /// Exhausted-retry errors are terminal even though their kind is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::MaxRetriesExceeded { .. } | Error::RateLimitExhausted { .. } => false,
            _ => matches!(self.kind(), ErrorKind::Transient | ErrorKind::RateLimited),
        }
    }

    /// Retry-After hint carried by a rate-limit error
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Error::RateLimited {
                retry_after_seconds,
            } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Result type alias for Solidafy Sync
pub type Result<T> = std::result::Result<T, Error>;
