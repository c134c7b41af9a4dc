//! Error types for the reservoir data pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, OnsError>;

/// Main error type shared by the ingestion and serving crates
#[derive(Error, Debug)]
pub enum OnsError {
    /// Missing or malformed caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catalog or warehouse object does not exist
    #[error("Remote object not found: {0}")]
    RemoteNotFound(String),

    /// Network failure or timeout; safe to retry
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// The remote side answered but refused the request
    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// Unparsable year token, date string or payload
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// The stored procedure promoting raw data to the trusted zone failed
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// Query failure reported by the warehouse other than a missing object
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OnsError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, OnsError::TransientIo(_))
    }

    /// Classify an HTTP status returned by a remote collaborator
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            OnsError::RemoteNotFound(context.to_string())
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            OnsError::TransientIo(format!("{}: HTTP {}", context, status))
        } else {
            OnsError::RemoteRejected {
                status: status.as_u16(),
                message: context.to_string(),
            }
        }
    }
}

impl From<reqwest::Error> for OnsError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let context = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "remote request".to_string());
            return OnsError::from_status(status, &context);
        }

        if err.is_decode() {
            OnsError::DataFormat(err.to_string())
        } else if err.is_builder() {
            OnsError::Config(err.to_string())
        } else {
            // timeouts, connect failures, truncated bodies
            OnsError::TransientIo(err.to_string())
        }
    }
}
