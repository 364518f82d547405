//! Object storage admin client errors

use thiserror::Error;

/// Errors that can occur when talking to the object-storage admin API
#[derive(Debug, Error)]
pub enum ObjectStorageError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Admin API returned an error
    #[error("Object storage admin API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad admin credentials)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Storage user not found
    #[error("User not found: {0}")]
    UserNotFound(String),
}
