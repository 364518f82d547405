//! ObjectStorageClient trait for mocking
//!
//! This trait abstracts the admin API client to enable mocking in unit tests.
//! The concrete ObjectStorageClient implements this trait, and tests can use
//! mock implementations.

use crate::error::ObjectStorageError;
use crate::models::{StorageUser, UserStatus};

/// Trait for object-storage admin API operations
///
/// This trait enables mocking of admin API calls for unit testing.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStorageClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the admin credentials
    async fn validate_credentials(&self) -> Result<(), ObjectStorageError>;

    /// List all storage users
    async fn list_users(&self) -> Result<Vec<StorageUser>, ObjectStorageError>;

    /// Fetch a single storage user by access key
    async fn get_user(&self, access_key: &str) -> Result<Option<StorageUser>, ObjectStorageError>;

    /// Enable or disable a storage user's credentials
    async fn set_user_status(
        &self,
        access_key: &str,
        status: UserStatus,
    ) -> Result<(), ObjectStorageError>;
}
