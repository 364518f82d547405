//! Object Storage Admin API Client
//!
//! A Rust client library for the tenant object-storage admin API.
//! Provides the small admin surface the debt controller needs: listing
//! storage users and enabling/disabling their credentials.
//!
//! # Example
//!
//! ```no_run
//! use objectstorage_client::{ObjectStorageClient, ObjectStorageClientTrait, UserStatus};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client
//! let client = ObjectStorageClient::new(
//!     "http://object-storage-admin:9000".to_string(),
//!     "admin-access-key".to_string(),
//!     "admin-secret-key".to_string(),
//! )?;
//!
//! // List all storage users
//! let users = client.list_users().await?;
//!
//! // Disable a user's credentials
//! client.set_user_status("tenant-a", UserStatus::Disabled).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **User Administration**: List users, query a single user, toggle enabled state
//! - **Idempotent Status Writes**: Setting an already-applied status is a no-op server-side
//! - **Mocking**: `test-util` feature exposes an in-memory mock for unit tests

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod storage_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ObjectStorageClient;
pub use error::ObjectStorageError;
pub use models::*;
pub use storage_trait::ObjectStorageClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockObjectStorageClient;
