//! Object storage admin API models

use serde::{Deserialize, Serialize};

/// Enabled/disabled state of a storage user's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Credentials accepted, requests served
    Enabled,
    /// Credentials rejected, all requests denied
    Disabled,
}

impl UserStatus {
    /// Wire representation used by the admin API query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Enabled => "enabled",
            UserStatus::Disabled => "disabled",
        }
    }
}

/// A storage user as returned by the admin list/get endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageUser {
    /// Access key, doubles as the user name
    #[serde(rename = "accessKey")]
    pub access_key: String,
    /// Current credential state
    pub status: UserStatus,
    /// Attached policy name, if any
    #[serde(default, rename = "policyName")]
    pub policy_name: Option<String>,
}
