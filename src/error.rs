//! Error types for the brand sender
//!
//! Only `Conflict` is recoverable: it drives the retry controller on the send
//! path and is absorbed as a benign outcome during skipped-nonce recovery.
//! Every other variant crosses component boundaries unchanged.

use thiserror::Error;

/// Main error type for the SDK
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Nonce conflict: {message}")]
    Conflict {
        message: String,
        status: Option<u16>,
    },

    #[error("Not found: {message}")]
    NotFound {
        message: String,
        status: Option<u16>,
    },

    #[error("Authorization error: {message}")]
    Authorization {
        message: String,
        status: Option<u16>,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        status: Option<u16>,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Failed to parse server response: {0}")]
    ServerResponseParse(String),

    #[error("HTTP {status} from ledger API: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SdkError {
    /// Conflict raised outside of an HTTP exchange
    pub fn conflict(message: impl Into<String>) -> Self {
        SdkError::Conflict {
            message: message.into(),
            status: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        SdkError::NotFound {
            message: message.into(),
            status: None,
        }
    }

    /// Check if error is retryable (a nonce race that a fresh nonce resolves)
    pub fn is_retryable(&self) -> bool {
        matches!(self, SdkError::Conflict { .. })
    }

    /// Everything that is not a conflict must reach the caller untouched
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SdkError::NotFound { .. })
    }

    /// HTTP status code attached to the error, if it came from the API
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SdkError::Conflict { status, .. }
            | SdkError::NotFound { status, .. }
            | SdkError::Authorization { status, .. }
            | SdkError::InvalidRequest { status, .. } => *status,
            SdkError::Http { status, .. } => Some(*status),
            SdkError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;
