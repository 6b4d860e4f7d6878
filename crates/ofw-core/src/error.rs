//! Error types for the core library.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration-related error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP transport error: {0}")]
    Http(String),

    /// An API call was attempted without a bearer token installed.
    #[error("not authenticated - run 'ofw auth login' first")]
    NotAuthenticated,

    /// The API answered with a non-success status.
    #[error("API error: {status} - {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// A generic error for other cases.
    #[error("error: {0}")]
    Other(String),
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
