//! Error types for es-reindex

use thiserror::Error;

/// Result type alias for reindex operations
pub type Result<T> = std::result::Result<T, ReindexError>;

/// Main error type for es-reindex
#[derive(Error, Debug)]
pub enum ReindexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid connection URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request signing error: {0}")]
    Signing(String),

    #[error("Scroll body parsing error, query_size param is possibly too high: {0}")]
    PageSizeTooLarge(String),

    #[error("Scroll error: {0}")]
    Scroll(String),

    #[error("Reindex error: {0}")]
    BulkWrite(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl ReindexError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid URI error
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a network error
    pub fn network(msg: impl std::fmt::Display) -> Self {
        Self::Network(msg.to_string())
    }

    /// Create a signing error
    pub fn signing(msg: impl std::fmt::Display) -> Self {
        Self::Signing(msg.to_string())
    }

    /// Classify a failed scroll fetch.
    ///
    /// The source cluster reports an oversized page as a body parse failure,
    /// so any message mentioning `parse` is surfaced as a page size problem.
    pub fn scroll_fetch(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if msg.contains("parse") {
            Self::PageSizeTooLarge(msg)
        } else {
            Self::Scroll(msg)
        }
    }

    /// Create a bulk write error
    pub fn bulk_write(msg: impl std::fmt::Display) -> Self {
        Self::BulkWrite(msg.to_string())
    }

    /// Create a worker error
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether this error must stop the run before any worker starts
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidUri { .. })
    }
}
