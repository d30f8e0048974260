//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Transient network conditions are recovered locally via retry and requeue
/// and never surface from `execute_operation`; only validation issues and
/// lifecycle misuse reach the caller as errors. Server-side rejections are
/// reported through `OperationFailed` events, not through this type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request exceeded its bounded timeout.
    #[error("request timed out")]
    Timeout,

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The collaborator validator rejected the input.
    #[error("validation failed: {}", issues.join("; "))]
    Validation {
        /// Issues reported by the validator.
        issues: Vec<String>,
    },

    /// Not connected to the server.
    #[error("not connected to server")]
    NotConnected,

    /// The engine was explicitly shut down.
    #[error("connection closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a validation error from reported issues.
    pub fn validation(issues: Vec<String>) -> Self {
        Self::Validation { issues }
    }

    /// Returns true if this error can be retried.
    ///
    /// Timeouts are treated identically to network failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
