//! Suspension configuration.
//!
//! Declarative mapping from resource kind to how that kind is suspended,
//! loaded once from the `suspension-config` ConfigMap (`config.yaml` key) in
//! the system namespace. Absent or malformed input falls back to a hard-coded
//! default table. The table is read-only after load; it is never hot-reloaded
//! within a reconciliation pass.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Api, Client};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Name of the system ConfigMap holding the suspension table
pub const SUSPENSION_CONFIG_NAME: &str = "suspension-config";
/// Data key inside the ConfigMap
pub const SUSPENSION_CONFIG_KEY: &str = "config.yaml";
/// Default inline-annotation ceiling for backups: 200 KiB, safely under the
/// Kubernetes annotation total-size limit.
pub const DEFAULT_BACKUP_SIZE_LIMIT: usize = 200 * 1024;

/// How a resource kind is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendAction {
    /// Annotate as suspended, mutate nothing else
    MarkSuspended,
    /// Delete outright (safe-to-recreate objects such as ACME challenges)
    Delete,
    /// Back up the traffic-carrying fragment, then clear it
    BackupAndClear,
}

/// Fully-qualified API coordinates of a resource kind
#[derive(Debug, Clone, Deserialize)]
pub struct GroupVersionResource {
    /// API group ("" for core)
    #[serde(default)]
    pub group: String,
    /// API version
    pub version: String,
    /// Plural resource name
    pub resource: String,
    /// CamelCase kind
    pub kind: String,
}

/// Suspension rule for one resource kind
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    /// Where the kind lives in the API
    pub group_version_resource: GroupVersionResource,
    /// Suspension technique
    pub strategy: SuspendAction,
    /// Whether a backup must exist before mutation
    #[serde(default)]
    pub backup_required: bool,
    /// Inline-annotation size ceiling for this kind's backups
    #[serde(default = "default_backup_size_limit")]
    pub backup_size_limit: usize,
}

fn default_backup_size_limit() -> usize {
    DEFAULT_BACKUP_SIZE_LIMIT
}

/// The full kind -> rule table
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct SuspensionConfig {
    resources: HashMap<String, ResourceRule>,
}

impl SuspensionConfig {
    /// Hard-coded default table used when the ConfigMap is absent or
    /// malformed. Covers every kind the strategies touch.
    pub fn default_table() -> Self {
        let mut resources = HashMap::new();

        let mut add = |key: &str,
                       group: &str,
                       version: &str,
                       resource: &str,
                       kind: &str,
                       strategy: SuspendAction,
                       backup_required: bool| {
            resources.insert(
                key.to_string(),
                ResourceRule {
                    group_version_resource: GroupVersionResource {
                        group: group.to_string(),
                        version: version.to_string(),
                        resource: resource.to_string(),
                        kind: kind.to_string(),
                    },
                    strategy,
                    backup_required,
                    backup_size_limit: DEFAULT_BACKUP_SIZE_LIMIT,
                },
            );
        };

        add(
            "certificates",
            "cert-manager.io",
            "v1",
            "certificates",
            "Certificate",
            SuspendAction::MarkSuspended,
            false,
        );
        add(
            "challenges",
            "acme.cert-manager.io",
            "v1",
            "challenges",
            "Challenge",
            SuspendAction::Delete,
            false,
        );
        add(
            "ingresses",
            "networking.k8s.io",
            "v1",
            "ingresses",
            "Ingress",
            SuspendAction::BackupAndClear,
            true,
        );
        add(
            "services",
            "",
            "v1",
            "services",
            "Service",
            SuspendAction::BackupAndClear,
            true,
        );
        add(
            "gateways",
            "networking.istio.io",
            "v1beta1",
            "gateways",
            "Gateway",
            SuspendAction::BackupAndClear,
            true,
        );
        add(
            "virtualservices",
            "networking.istio.io",
            "v1beta1",
            "virtualservices",
            "VirtualService",
            SuspendAction::BackupAndClear,
            true,
        );
        add(
            "destinationrules",
            "networking.istio.io",
            "v1beta1",
            "destinationrules",
            "DestinationRule",
            SuspendAction::MarkSuspended,
            false,
        );

        Self { resources }
    }

    /// Parse the `config.yaml` payload.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load from the system ConfigMap, falling back to the default table.
    pub async fn load(client: Client, system_namespace: &str) -> Self {
        let api: Api<ConfigMap> = Api::namespaced(client, system_namespace);
        match api.get_opt(SUSPENSION_CONFIG_NAME).await {
            Ok(Some(cm)) => {
                let yaml = cm
                    .data
                    .as_ref()
                    .and_then(|d| d.get(SUSPENSION_CONFIG_KEY))
                    .cloned();
                match yaml {
                    Some(yaml) => match Self::from_yaml(&yaml) {
                        Ok(config) => {
                            info!(
                                "Loaded suspension config with {} resource kinds",
                                config.resources.len()
                            );
                            config
                        }
                        Err(e) => {
                            warn!(
                                "Malformed {} in {}/{}: {}, using default table",
                                SUSPENSION_CONFIG_KEY, system_namespace, SUSPENSION_CONFIG_NAME, e
                            );
                            Self::default_table()
                        }
                    },
                    None => {
                        warn!(
                            "ConfigMap {}/{} has no {} key, using default table",
                            system_namespace, SUSPENSION_CONFIG_NAME, SUSPENSION_CONFIG_KEY
                        );
                        Self::default_table()
                    }
                }
            }
            Ok(None) => {
                info!(
                    "No {} ConfigMap in {}, using default table",
                    SUSPENSION_CONFIG_NAME, system_namespace
                );
                Self::default_table()
            }
            Err(e) => {
                warn!(
                    "Failed to read suspension config ({}), using default table",
                    e
                );
                Self::default_table()
            }
        }
    }

    /// Rule for a resource kind key (plural, lowercase).
    pub fn rule(&self, kind: &str) -> Option<&ResourceRule> {
        self.resources.get(kind)
    }

    /// Dynamic-API coordinates for a resource kind key.
    pub fn api_resource(&self, kind: &str) -> Option<ApiResource> {
        self.rule(kind).map(|r| {
            let gvr = &r.group_version_resource;
            ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(&gvr.group, &gvr.version, &gvr.kind),
                &gvr.resource,
            )
        })
    }

    /// Inline-annotation size ceiling for a kind, falling back to the default.
    pub fn backup_size_limit(&self, kind: &str) -> usize {
        self.rule(kind)
            .map(|r| r.backup_size_limit)
            .unwrap_or(DEFAULT_BACKUP_SIZE_LIMIT)
    }

    /// Number of configured kinds.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when no kinds are configured.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_covers_required_kinds() {
        let config = SuspensionConfig::default_table();
        for kind in [
            "certificates",
            "challenges",
            "ingresses",
            "services",
            "gateways",
            "virtualservices",
            "destinationrules",
        ] {
            assert!(config.rule(kind).is_some(), "missing default rule for {}", kind);
        }
        assert_eq!(
            config.rule("challenges").unwrap().strategy,
            SuspendAction::Delete
        );
        assert_eq!(
            config.rule("ingresses").unwrap().strategy,
            SuspendAction::BackupAndClear
        );
        assert_eq!(
            config.rule("certificates").unwrap().strategy,
            SuspendAction::MarkSuspended
        );
    }

    #[test]
    fn test_parse_yaml_table() {
        let yaml = r#"
ingresses:
  groupVersionResource:
    group: networking.k8s.io
    version: v1
    resource: ingresses
    kind: Ingress
  strategy: backup_and_clear
  backupRequired: true
  backupSizeLimit: 1024
"#;
        let config = SuspensionConfig::from_yaml(yaml).unwrap();
        let rule = config.rule("ingresses").unwrap();
        assert_eq!(rule.strategy, SuspendAction::BackupAndClear);
        assert!(rule.backup_required);
        assert_eq!(rule.backup_size_limit, 1024);
        assert_eq!(config.backup_size_limit("ingresses"), 1024);
    }

    #[test]
    fn test_parse_yaml_defaults_size_limit() {
        let yaml = r#"
services:
  groupVersionResource:
    version: v1
    resource: services
    kind: Service
  strategy: backup_and_clear
"#;
        let config = SuspensionConfig::from_yaml(yaml).unwrap();
        let rule = config.rule("services").unwrap();
        assert_eq!(rule.backup_size_limit, DEFAULT_BACKUP_SIZE_LIMIT);
        assert!(!rule.backup_required);
        assert_eq!(rule.group_version_resource.group, "");
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(SuspensionConfig::from_yaml("not: [valid").is_err());
    }

    #[test]
    fn test_api_resource_coordinates() {
        let config = SuspensionConfig::default_table();
        let ar = config.api_resource("gateways").unwrap();
        assert_eq!(ar.group, "networking.istio.io");
        assert_eq!(ar.kind, "Gateway");
        assert_eq!(ar.plural, "gateways");
        assert!(config.api_resource("unknown").is_none());
    }
}
