//! Controller-specific error types.
//!
//! This module defines error types specific to the debt controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use objectstorage_client::ObjectStorageError;
use thiserror::Error;

/// Errors that can occur in the debt controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object storage admin API error
    #[error("Object storage error: {0}")]
    ObjectStorage(#[from] ObjectStorageError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another replica holds the lock for this namespace/operation
    #[error("Lock busy: {0}")]
    LockBusy(String),

    /// The lock-protected section exceeded its deadline
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A backup payload failed structural validation
    #[error("Backup corrupted: {0}")]
    BackupCorrupted(String),

    /// The in-memory suspension cache is unusable
    #[error("Suspension cache error: {0}")]
    Cache(String),

    /// A suspension strategy failed
    #[error("Strategy {strategy} failed: {message}")]
    Strategy {
        /// Name of the failing strategy
        strategy: &'static str,
        /// What went wrong
        message: String,
    },

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registration or serving failed
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl ControllerError {
    /// True when the error is lock contention, which signals "try again
    /// later" rather than a real failure.
    pub fn is_lock_busy(&self) -> bool {
        matches!(self, ControllerError::LockBusy(_))
    }
}
