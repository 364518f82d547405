//! Backup/restore codec.
//!
//! Serializes a resource's mutable configuration fragment (rules, ports,
//! servers, http routes, role refs) to JSON and decides where it lives: small
//! payloads go inline as an annotation value, payloads over the size ceiling
//! go into a companion labeled ConfigMap with only the ConfigMap name stored
//! as a pointer annotation. A suspended resource always has exactly one live
//! backup location; a resource with no discoverable location is the
//! "never suspended" case, not an error.

use crate::annotations::{
    BACKUP_CONFIGMAP_SUFFIX, BACKUP_SOURCE_KIND_LABEL, BACKUP_SOURCE_NAME_LABEL,
};
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Kubernetes object names are capped at 63 characters
const MAX_NAME_LEN: usize = 63;
/// Data key holding the payload inside a backup ConfigMap
const CONFIGMAP_DATA_KEY: &str = "config";

/// Where a backup payload will be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPlan {
    /// Payload fits in an annotation value
    Inline(String),
    /// Payload goes into a companion ConfigMap
    External {
        /// Deterministic ConfigMap name
        configmap_name: String,
        /// Serialized payload
        json: String,
    },
}

/// Encodes and decodes backup payloads against annotations and ConfigMaps.
#[derive(Clone)]
pub struct BackupCodec {
    client: Client,
}

impl BackupCodec {
    /// Create a codec bound to a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Decide the storage location for a payload. Pure; no API calls.
    pub fn plan(
        source_kind: &str,
        source_name: &str,
        key: &str,
        payload: &Value,
        size_limit: usize,
    ) -> Result<BackupPlan, ControllerError> {
        let json = serde_json::to_string(payload)?;
        if json.len() > size_limit {
            Ok(BackupPlan::External {
                configmap_name: Self::configmap_name(source_kind, source_name, key),
                json,
            })
        } else {
            Ok(BackupPlan::Inline(json))
        }
    }

    /// Deterministic, DNS-1123-safe ConfigMap name for a backup, truncated to
    /// the 63-character Kubernetes name limit.
    pub fn configmap_name(source_kind: &str, source_name: &str, key: &str) -> String {
        let raw = format!("debt-backup-{}-{}-{}", source_kind, source_name, key);
        let mut name: String = raw
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        name.truncate(MAX_NAME_LEN);
        name.trim_matches('-').to_string()
    }

    /// Structural validation applied to every restored fragment: the payload
    /// must be a JSON array whose elements are all objects. Fails fast on
    /// corrupted state instead of applying a malformed configuration.
    pub fn validate_fragment(payload: &Value) -> Result<(), ControllerError> {
        let items = payload.as_array().ok_or_else(|| {
            ControllerError::BackupCorrupted(format!(
                "expected a JSON array, got {}",
                type_name(payload)
            ))
        })?;
        for (i, item) in items.iter().enumerate() {
            if !item.is_object() {
                return Err(ControllerError::BackupCorrupted(format!(
                    "element {} is {}, expected an object",
                    i,
                    type_name(item)
                )));
            }
        }
        Ok(())
    }

    /// Store a payload for a resource, returning the annotation entries the
    /// caller must merge onto the resource. Creates (or refreshes) the
    /// companion ConfigMap for oversized payloads.
    pub async fn store(
        &self,
        namespace: &str,
        source_kind: &str,
        source_name: &str,
        key: &str,
        payload: &Value,
        size_limit: usize,
    ) -> Result<Vec<(String, String)>, ControllerError> {
        match Self::plan(source_kind, source_name, key, payload, size_limit)? {
            BackupPlan::Inline(json) => {
                debug!(
                    "Backing up {}/{} {} inline ({} bytes)",
                    namespace,
                    source_name,
                    key,
                    json.len()
                );
                Ok(vec![(key.to_string(), json)])
            }
            BackupPlan::External {
                configmap_name,
                json,
            } => {
                debug!(
                    "Backing up {}/{} {} to ConfigMap {} ({} bytes)",
                    namespace,
                    source_name,
                    key,
                    configmap_name,
                    json.len()
                );
                self.write_backup_configmap(namespace, &configmap_name, source_kind, source_name, json)
                    .await?;
                Ok(vec![(
                    format!("{}{}", key, BACKUP_CONFIGMAP_SUFFIX),
                    configmap_name,
                )])
            }
        }
    }

    /// Load the payload for a resource. Prefers the inline annotation, falls
    /// back to the ConfigMap pointer, and returns `None` when neither exists.
    pub async fn load(
        &self,
        namespace: &str,
        resource_annotations: &BTreeMap<String, String>,
        key: &str,
    ) -> Result<Option<Value>, ControllerError> {
        if let Some(json) = resource_annotations.get(key) {
            let payload: Value = serde_json::from_str(json).map_err(|e| {
                ControllerError::BackupCorrupted(format!("inline backup {}: {}", key, e))
            })?;
            return Ok(Some(payload));
        }

        let pointer_key = format!("{}{}", key, BACKUP_CONFIGMAP_SUFFIX);
        let Some(configmap_name) = resource_annotations.get(&pointer_key) else {
            return Ok(None);
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = api.get_opt(configmap_name).await?.ok_or_else(|| {
            ControllerError::BackupCorrupted(format!(
                "backup pointer {} references missing ConfigMap {}/{}",
                pointer_key, namespace, configmap_name
            ))
        })?;
        let json = cm
            .data
            .as_ref()
            .and_then(|d| d.get(CONFIGMAP_DATA_KEY))
            .ok_or_else(|| {
                ControllerError::BackupCorrupted(format!(
                    "backup ConfigMap {}/{} has no {} key",
                    namespace, configmap_name, CONFIGMAP_DATA_KEY
                ))
            })?;
        let payload: Value = serde_json::from_str(json).map_err(|e| {
            ControllerError::BackupCorrupted(format!(
                "backup ConfigMap {}/{}: {}",
                namespace, configmap_name, e
            ))
        })?;
        Ok(Some(payload))
    }

    /// Delete the external backup location, if any. Inline backups disappear
    /// when the caller strips the annotation; missing ConfigMaps are ignored
    /// so discard stays idempotent.
    pub async fn discard(
        &self,
        namespace: &str,
        resource_annotations: &BTreeMap<String, String>,
        key: &str,
    ) -> Result<(), ControllerError> {
        let pointer_key = format!("{}{}", key, BACKUP_CONFIGMAP_SUFFIX);
        if let Some(configmap_name) = resource_annotations.get(&pointer_key) {
            let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
            match api.delete(configmap_name, &DeleteParams::default()).await {
                Ok(_) => debug!("Deleted backup ConfigMap {}/{}", namespace, configmap_name),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    warn!(
                        "Backup ConfigMap {}/{} already gone",
                        namespace, configmap_name
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Annotation keys a backup for `key` may occupy on the resource.
    pub fn annotation_keys(key: &str) -> [String; 2] {
        [key.to_string(), format!("{}{}", key, BACKUP_CONFIGMAP_SUFFIX)]
    }

    async fn write_backup_configmap(
        &self,
        namespace: &str,
        name: &str,
        source_kind: &str,
        source_name: &str,
        json: String,
    ) -> Result<(), ControllerError> {
        let mut labels = BTreeMap::new();
        labels.insert(BACKUP_SOURCE_KIND_LABEL.to_string(), source_kind.to_string());
        labels.insert(BACKUP_SOURCE_NAME_LABEL.to_string(), source_name.to_string());

        let mut data = BTreeMap::new();
        data.insert(CONFIGMAP_DATA_KEY.to_string(), json);

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data.clone()),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                // A prior interrupted run left its ConfigMap behind; refresh it.
                let patch = serde_json::json!({ "data": data });
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_routes_small_payload_inline() {
        let payload = json!([{"host": "a.com"}]);
        let plan = BackupCodec::plan("ingress", "web", "debt-original-hosts", &payload, 200 * 1024)
            .unwrap();
        match plan {
            BackupPlan::Inline(json) => assert!(json.contains("a.com")),
            BackupPlan::External { .. } => panic!("small payload must stay inline"),
        }
    }

    #[test]
    fn test_plan_routes_oversized_payload_to_configmap() {
        let big = "x".repeat(1024);
        let payload = json!([{"host": big}]);
        let plan =
            BackupCodec::plan("ingress", "web", "debt-original-hosts", &payload, 512).unwrap();
        match plan {
            BackupPlan::External { configmap_name, json } => {
                assert!(configmap_name.len() <= 63);
                assert!(configmap_name.starts_with("debt-backup-ingress-web"));
                assert!(json.len() > 512);
            }
            BackupPlan::Inline(_) => panic!("oversized payload must go external"),
        }
    }

    #[test]
    fn test_configmap_name_is_dns_safe_and_truncated() {
        let name = BackupCodec::configmap_name(
            "virtualservice",
            "a-very-long-resource-name-that-keeps-going-and-going",
            "debt-original-http",
        );
        assert!(name.len() <= 63);
        assert!(
            name.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        );
        assert!(!name.starts_with('-') && !name.ends_with('-'));

        // Deterministic for the same inputs
        let again = BackupCodec::configmap_name(
            "virtualservice",
            "a-very-long-resource-name-that-keeps-going-and-going",
            "debt-original-http",
        );
        assert_eq!(name, again);
    }

    #[test]
    fn test_validate_fragment_accepts_array_of_objects() {
        assert!(BackupCodec::validate_fragment(&json!([])).is_ok());
        assert!(BackupCodec::validate_fragment(&json!([{"port": 80}, {"port": 443}])).is_ok());
    }

    #[test]
    fn test_validate_fragment_rejects_malformed_payloads() {
        assert!(BackupCodec::validate_fragment(&json!(null)).is_err());
        assert!(BackupCodec::validate_fragment(&json!({"port": 80})).is_err());
        assert!(BackupCodec::validate_fragment(&json!([1, 2, 3])).is_err());
        assert!(BackupCodec::validate_fragment(&json!([{"ok": true}, "bad"])).is_err());
    }

    #[test]
    fn test_annotation_keys() {
        let keys = BackupCodec::annotation_keys("debt-original-ports");
        assert_eq!(keys[0], "debt-original-ports");
        assert_eq!(keys[1], "debt-original-ports-configmap");
    }
}
