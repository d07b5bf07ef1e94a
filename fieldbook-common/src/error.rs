//! Common error types for Fieldbook

use thiserror::Error;

/// Common result type for Fieldbook operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the server and client crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested study, card, or artifact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation conflicts with existing state (e.g. duplicate study label)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
