//! Error types for faceswap-tasks
//!
//! This module provides the error taxonomy for vendor task orchestration:
//! - Transport and HTTP status failures (retryable for idempotent calls)
//! - Vendor business errors carried in the response envelope (never retried)
//! - Terminal task failures and poll timeouts, kept distinct from each other
//! - Transfer and storage failures for the result mirroring cache
//! - HTTP status code mapping for callers that expose these outcomes over HTTP

use std::time::Duration;
use thiserror::Error;

/// Result type alias for faceswap-tasks operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for faceswap-tasks
///
/// Every failure in the orchestration layer is recovered at the component
/// boundary and returned as one of these variants. None of them is fatal to
/// the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "vendor.base_url")
        key: Option<String>,
    },

    /// Transport-level failure (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Caller-supplied input was rejected before reaching the vendor
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The vendor has no task with this identifier
    #[error("task {0} not found")]
    TaskNotFound(String),

    /// Upstream answered with a non-success HTTP status
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code returned by the upstream
        status: u16,
        /// Response body, kept for diagnostics
        body: String,
    },

    /// Well-formed vendor envelope carrying a non-success application code
    #[error("vendor error (code {code}): {message}")]
    Vendor {
        /// Application-level code from the envelope
        code: i64,
        /// Vendor message, normalized to a single string
        message: String,
    },

    /// The remote task reached the terminal `failed` state
    #[error("task {task_id} failed: {reason}")]
    TaskFailed {
        /// Vendor task identifier
        task_id: String,
        /// Vendor-reported failure reason
        reason: String,
    },

    /// The polling deadline elapsed before a terminal state was observed
    #[error("task {task_id} did not finish within {timeout:?}")]
    PollTimeout {
        /// Vendor task identifier
        task_id: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// A retryable failure persisted through every allowed attempt
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: u32,
        /// The error from the final attempt
        last: Box<Error>,
    },

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// Copying a result artifact into owned storage failed
    #[error("transfer of task {task_id} failed: {reason}")]
    Transfer {
        /// Vendor task identifier
        task_id: String,
        /// Why the copy failed
        reason: String,
    },

    /// Object storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Vendor output or envelope could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A required collaborator has no configuration
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when polling gave up; the task outcome is unknown, not failed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::PollTimeout { .. })
    }

    /// True when the vendor reported the task itself as failed
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Error::TaskFailed { .. })
    }

    /// True when the operation stopped because of caller cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Convert errors to HTTP status codes for callers exposing them over HTTP
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } | Error::InvalidInput(_) => 400,

            Error::TaskNotFound(_) => 404,

            // Upstream misbehaved or refused the request
            Error::Network(_)
            | Error::HttpStatus { .. }
            | Error::Vendor { .. }
            | Error::RetriesExhausted { .. }
            | Error::TaskFailed { .. }
            | Error::Decode(_) => 502,

            // Unknown outcome, client may try again later
            Error::PollTimeout { .. } => 504,

            Error::NotConfigured(_) | Error::Cancelled => 503,

            Error::Transfer { .. }
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Serialization(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::TaskNotFound(_) => "task_not_found",
            Error::Network(_) => "network_error",
            Error::HttpStatus { .. } => "upstream_http_error",
            Error::Vendor { .. } => "vendor_error",
            Error::TaskFailed { .. } => "task_failed",
            Error::PollTimeout { .. } => "poll_timeout",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::Cancelled => "cancelled",
            Error::Transfer { .. } => "transfer_failed",
            Error::Storage(_) => "storage_error",
            Error::Decode(_) => "decode_error",
            Error::NotConfigured(_) => "not_configured",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}
