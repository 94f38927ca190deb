//! Error types for the finsight pipeline.

use thiserror::Error;

/// Result type alias using finsight's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for finsight operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Report not found
    #[error("Report not found: {0}")]
    ReportNotFound(uuid::Uuid),

    /// Blob storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Analyzer call exceeded the hard deadline
    #[error("Analyzer timeout: {0}")]
    AnalyzerTimeout(String),

    /// Analyzer unreachable or returned a server-side failure (5xx, connect, DNS)
    #[error("Analyzer unavailable: {0}")]
    AnalyzerUnavailable(String),

    /// Analyzer rejected the request or reported an explicit failure (4xx, success=false)
    #[error("Analyzer rejected request: {0}")]
    AnalyzerRejected(String),

    /// Analyzer responded without the structured analysis result
    #[error("Analyzer response missing analysis result: {0}")]
    MissingAnalysis(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Report is in a state that forbids the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is transient and worth retrying under the retry bound.
    ///
    /// Transient: timeouts, connection failures, 5xx responses. Terminal:
    /// explicit rejections, malformed responses, missing required fields.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::AnalyzerTimeout(_) | Error::AnalyzerUnavailable(_) | Error::Request(_)
        )
    }

    /// Whether this error means the record was concurrently removed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::ReportNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::AnalyzerTimeout(e.to_string())
        } else if e.is_connect() {
            Error::AnalyzerUnavailable(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
