//! Mock ObjectStorageClient for unit testing
//!
//! This module provides a mock implementation of ObjectStorageClientTrait that
//! can be used in unit tests without requiring a running object-storage backend.

use crate::error::ObjectStorageError;
use crate::models::{StorageUser, UserStatus};
use crate::storage_trait::ObjectStorageClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock ObjectStorageClient for testing
///
/// Stores users in memory and records every status write so tests can assert
/// which calls were made.
#[derive(Clone)]
pub struct MockObjectStorageClient {
    base_url: String,
    users: Arc<Mutex<HashMap<String, StorageUser>>>,
    /// Recorded (access_key, status) pairs for every set_user_status call
    status_calls: Arc<Mutex<Vec<(String, UserStatus)>>>,
    /// When set, all calls fail with this API error message
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockObjectStorageClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            users: Arc::new(Mutex::new(HashMap::new())),
            status_calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: Arc::new(Mutex::new(None)),
        }
    }

    /// Add a user to the mock store (for test setup)
    pub fn add_user(&self, user: StorageUser) {
        self.users
            .lock()
            .unwrap()
            .insert(user.access_key.clone(), user);
    }

    /// Make all subsequent calls fail with the given message
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(message.into());
    }

    /// All recorded set_user_status calls, in order
    pub fn status_calls(&self) -> Vec<(String, UserStatus)> {
        self.status_calls.lock().unwrap().clone()
    }

    fn check_failure(&self) -> Result<(), ObjectStorageError> {
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(ObjectStorageError::Api(msg));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStorageClientTrait for MockObjectStorageClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_credentials(&self) -> Result<(), ObjectStorageError> {
        self.check_failure()
    }

    async fn list_users(&self) -> Result<Vec<StorageUser>, ObjectStorageError> {
        self.check_failure()?;
        Ok(self.users.lock().unwrap().values().cloned().collect())
    }

    async fn get_user(&self, access_key: &str) -> Result<Option<StorageUser>, ObjectStorageError> {
        self.check_failure()?;
        Ok(self.users.lock().unwrap().get(access_key).cloned())
    }

    async fn set_user_status(
        &self,
        access_key: &str,
        status: UserStatus,
    ) -> Result<(), ObjectStorageError> {
        self.check_failure()?;
        self.status_calls
            .lock()
            .unwrap()
            .push((access_key.to_string(), status));

        let mut users = self.users.lock().unwrap();
        match users.get_mut(access_key) {
            Some(user) => {
                user.status = status;
                Ok(())
            }
            None => Err(ObjectStorageError::UserNotFound(access_key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_user_status_records_calls() {
        let mock = MockObjectStorageClient::new("http://test-storage");
        mock.add_user(StorageUser {
            access_key: "tenant-a".to_string(),
            status: UserStatus::Enabled,
            policy_name: None,
        });

        mock.set_user_status("tenant-a", UserStatus::Disabled)
            .await
            .unwrap();

        let calls = mock.status_calls();
        assert_eq!(calls, vec![("tenant-a".to_string(), UserStatus::Disabled)]);

        let user = mock.get_user("tenant-a").await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Disabled);
    }

    #[tokio::test]
    async fn test_set_user_status_unknown_user() {
        let mock = MockObjectStorageClient::new("http://test-storage");
        let result = mock.set_user_status("nobody", UserStatus::Disabled).await;
        assert!(matches!(result, Err(ObjectStorageError::UserNotFound(_))));
    }
}
