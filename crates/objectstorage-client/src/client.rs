//! Object storage admin API client
//!
//! Implements the small admin surface used by the debt controller:
//! /admin/v3/list-users, /admin/v3/user-info and /admin/v3/set-user-status.

use crate::error::ObjectStorageError;
use crate::models::{StorageUser, UserStatus};
use crate::storage_trait::ObjectStorageClientTrait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Object storage admin API client
pub struct ObjectStorageClient {
    client: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl ObjectStorageClient {
    /// Create a new admin client
    ///
    /// # Arguments
    /// * `base_url` - Admin endpoint base URL (e.g., "http://object-storage-admin:9000")
    /// * `access_key` - Admin access key
    /// * `secret_key` - Admin secret key
    pub fn new(
        base_url: String,
        access_key: String,
        secret_key: String,
    ) -> Result<Self, ObjectStorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ObjectStorageError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key,
            secret_key,
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, ObjectStorageError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStorageError::Authentication(format!(
                "{} - {}",
                status, body
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStorageError::Api(format!("{} - {}", status, body)));
        }

        let response_text = response.text().await?;
        serde_json::from_str(&response_text).map_err(|e| {
            ObjectStorageError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                response_text.chars().take(500).collect::<String>()
            ))
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorageClientTrait for ObjectStorageClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validate the admin credentials with a lightweight list call.
    async fn validate_credentials(&self) -> Result<(), ObjectStorageError> {
        debug!("Validating object storage admin credentials");
        let url = self.build_url("/admin/v3/list-users");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStorageError::Authentication(format!(
                "Invalid admin credentials: {} - {}",
                status, body
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStorageError::Api(format!(
                "Failed to validate credentials: {} - {}",
                status, body
            )));
        }

        debug!("Admin credentials validated successfully");
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<StorageUser>, ObjectStorageError> {
        let url = self.build_url("/admin/v3/list-users");
        // The admin API returns a map keyed by access key
        let users: HashMap<String, StorageUser> = self.get_json(&url).await?;
        Ok(users.into_values().collect())
    }

    async fn get_user(&self, access_key: &str) -> Result<Option<StorageUser>, ObjectStorageError> {
        let url = self.build_url(&format!(
            "/admin/v3/user-info?accessKey={}",
            urlencoding::encode(access_key)
        ));

        match self.get_json::<StorageUser>(&url).await {
            Ok(user) => Ok(Some(user)),
            Err(ObjectStorageError::Api(msg)) if msg.starts_with("404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_user_status(
        &self,
        access_key: &str,
        status: UserStatus,
    ) -> Result<(), ObjectStorageError> {
        let url = self.build_url(&format!(
            "/admin/v3/set-user-status?accessKey={}&status={}",
            urlencoding::encode(access_key),
            status.as_str()
        ));
        debug!("Setting user {} status to {}", access_key, status.as_str());

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?;

        let http_status = response.status();
        if http_status == 404 {
            return Err(ObjectStorageError::UserNotFound(access_key.to_string()));
        }

        if !http_status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStorageError::Api(format!(
                "Failed to set user status: {} - {}",
                http_status, body
            )));
        }

        Ok(())
    }
}
