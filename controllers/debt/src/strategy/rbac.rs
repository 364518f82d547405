//! RBAC suspension strategy.
//!
//! Suspension swaps every tenant RoleBinding over to a read-only Role so the
//! tenant can still inspect workloads but no longer mutate them. RoleBinding
//! roleRefs are immutable in Kubernetes, so the swap is a delete-and-recreate
//! with the original roleRef and subjects backed up through the codec first.
//! System bindings (kubelet, controller-manager, bootstrap machinery) are
//! never touched. This phase runs last on suspend and first on resume so the
//! tenant keeps write access while their traffic and certificates are being
//! worked on.

use super::network::kind_exceeds_failure_threshold;
use super::{SuspensionStrategy, RBAC_STRATEGY};
use crate::annotations::{
    ORIGINAL_ROLE_REF_ANNOTATION, SUSPENDED_ANNOTATION, SUSPENDED_TIME_ANNOTATION,
};
use crate::backup::BackupCodec;
use crate::cache::ResourceCache;
use crate::config::SuspensionConfig;
use crate::error::ControllerError;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the read-only Role substituted for the tenant's own roles
pub const RESTRICTED_ROLE_NAME: &str = "debt-restricted-role";

/// Binding-name prefixes owned by the cluster or the platform, not the tenant.
const SYSTEM_BINDING_PREFIXES: [&str; 4] =
    ["system:", "cluster-", "kubeadm:", "tenantcloud-system-"];

/// Substrings that mark a roleRef as cluster plumbing we must not rewire.
const PRIVILEGED_ROLE_MARKERS: [&str; 3] = ["system", "admin", "cluster"];

/// True for RoleBindings that belong to the cluster rather than the tenant.
pub(crate) fn is_system_binding(binding_name: &str, role_ref_name: &str) -> bool {
    if SYSTEM_BINDING_PREFIXES
        .iter()
        .any(|p| binding_name.starts_with(p))
    {
        return true;
    }
    PRIVILEGED_ROLE_MARKERS
        .iter()
        .any(|m| role_ref_name.contains(m))
}

/// Policy rules of the restricted Role: read-only access to core workloads.
pub(crate) fn restricted_policy_rules() -> Vec<PolicyRule> {
    let read_verbs = vec!["get".to_string(), "list".to_string(), "watch".to_string()];
    vec![
        PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec![
                "pods".to_string(),
                "services".to_string(),
                "configmaps".to_string(),
                "secrets".to_string(),
            ]),
            verbs: read_verbs.clone(),
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec!["networking.k8s.io".to_string()]),
            resources: Some(vec!["ingresses".to_string()]),
            verbs: read_verbs.clone(),
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec!["networking.istio.io".to_string()]),
            resources: Some(vec![
                "gateways".to_string(),
                "virtualservices".to_string(),
            ]),
            verbs: read_verbs,
            ..Default::default()
        },
    ]
}

/// Swaps tenant RoleBindings to a read-only Role and back.
pub struct RbacStrategy {
    client: Client,
    cache: ResourceCache,
    codec: BackupCodec,
    config: Arc<SuspensionConfig>,
}

impl RbacStrategy {
    /// Create the strategy.
    pub fn new(
        client: Client,
        cache: ResourceCache,
        codec: BackupCodec,
        config: Arc<SuspensionConfig>,
    ) -> Self {
        Self {
            client,
            cache,
            codec,
            config,
        }
    }

    fn is_suspended(binding: &RoleBinding) -> bool {
        binding
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SUSPENDED_ANNOTATION))
            .is_some_and(|v| v == "true")
    }

    async fn ensure_restricted_role(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        let role = Role {
            metadata: ObjectMeta {
                name: Some(RESTRICTED_ROLE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            rules: Some(restricted_policy_rules()),
        };
        match api.create(&PostParams::default(), &role).await {
            Ok(_) => {
                info!("Created restricted role in {}", namespace);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("Restricted role already present in {}", namespace);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_restricted_role(&self, namespace: &str) -> Result<(), ControllerError> {
        let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let still_referenced = bindings
            .list(&ListParams::default())
            .await?
            .items
            .iter()
            .any(|b| b.role_ref.name == RESTRICTED_ROLE_NAME);
        if still_referenced {
            debug!(
                "Restricted role in {} still referenced, leaving in place",
                namespace
            );
            return Ok(());
        }

        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(RESTRICTED_ROLE_NAME, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted restricted role in {}", namespace),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Restricted role in {} already gone", namespace);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Backup payload carried on a swapped binding: the original roleRef and
    /// subjects, as one JSON object.
    fn backup_payload(binding: &RoleBinding) -> Result<Value, ControllerError> {
        Ok(json!({
            "roleRef": serde_json::to_value(&binding.role_ref)?,
            "subjects": serde_json::to_value(binding.subjects.clone().unwrap_or_default())?,
        }))
    }

    /// Structural validation of a restored RBAC backup. Unlike the network
    /// fragments this is an object, so it gets its own shape check.
    fn decode_backup(payload: &Value) -> Result<(RoleRef, Vec<Subject>), ControllerError> {
        let role_ref = payload
            .get("roleRef")
            .ok_or_else(|| {
                ControllerError::BackupCorrupted("RBAC backup has no roleRef".to_string())
            })
            .and_then(|v| {
                serde_json::from_value::<RoleRef>(v.clone()).map_err(|e| {
                    ControllerError::BackupCorrupted(format!("RBAC backup roleRef: {}", e))
                })
            })?;
        let subjects = match payload.get("subjects") {
            Some(v) => serde_json::from_value::<Vec<Subject>>(v.clone()).map_err(|e| {
                ControllerError::BackupCorrupted(format!("RBAC backup subjects: {}", e))
            })?,
            None => Vec::new(),
        };
        Ok((role_ref, subjects))
    }

    /// Delete a binding and recreate it with new contents. roleRef is
    /// immutable, so patching is not an option.
    async fn replace_binding(
        &self,
        api: &Api<RoleBinding>,
        name: &str,
        replacement: &RoleBinding,
    ) -> Result<(), ControllerError> {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
        api.create(&PostParams::default(), replacement).await?;
        Ok(())
    }

    async fn suspend_binding(
        &self,
        api: &Api<RoleBinding>,
        namespace: &str,
        name: &str,
        binding: &RoleBinding,
    ) -> Result<(), ControllerError> {
        let payload = Self::backup_payload(binding)?;
        let entries = self
            .codec
            .store(
                namespace,
                "rolebinding",
                name,
                ORIGINAL_ROLE_REF_ANNOTATION,
                &payload,
                self.config.backup_size_limit("rolebindings"),
            )
            .await?;

        let mut annotations: BTreeMap<String, String> = binding
            .metadata
            .annotations
            .clone()
            .unwrap_or_default();
        for (k, v) in entries {
            annotations.insert(k, v);
        }
        annotations.insert(SUSPENDED_ANNOTATION.to_string(), "true".to_string());
        annotations.insert(
            SUSPENDED_TIME_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );

        // The backup goes onto the live binding before the swap. A crash
        // mid-swap then leaves either the annotated original, which resume
        // restores, or at worst only the delete-create gap of the swap
        // itself, covered by the external backup ConfigMap when one exists.
        let annotation_patch = json!({ "metadata": { "annotations": &annotations } });
        api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(&annotation_patch),
        )
        .await?;

        let replacement = RoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: binding.metadata.labels.clone(),
                annotations: Some(annotations),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: RESTRICTED_ROLE_NAME.to_string(),
            },
            subjects: binding.subjects.clone(),
        };
        self.replace_binding(api, name, &replacement).await?;
        info!("Swapped rolebinding {}/{} to restricted role", namespace, name);
        Ok(())
    }

    async fn resume_binding(
        &self,
        api: &Api<RoleBinding>,
        namespace: &str,
        name: &str,
        binding: &RoleBinding,
    ) -> Result<(), ControllerError> {
        let original_annotations = binding.metadata.annotations.clone().unwrap_or_default();
        let Some(payload) = self
            .codec
            .load(namespace, &original_annotations, ORIGINAL_ROLE_REF_ANNOTATION)
            .await?
        else {
            debug!("Rolebinding {}/{} has no backup, skipping", namespace, name);
            return Ok(());
        };
        let (role_ref, subjects) = Self::decode_backup(&payload)?;

        let mut annotations = original_annotations.clone();
        for key in BackupCodec::annotation_keys(ORIGINAL_ROLE_REF_ANNOTATION) {
            annotations.remove(&key);
        }
        annotations.remove(SUSPENDED_ANNOTATION);
        annotations.remove(SUSPENDED_TIME_ANNOTATION);

        let replacement = RoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: binding.metadata.labels.clone(),
                annotations: if annotations.is_empty() {
                    None
                } else {
                    Some(annotations.clone())
                },
                ..Default::default()
            },
            role_ref,
            subjects: if subjects.is_empty() {
                None
            } else {
                Some(subjects)
            },
        };
        self.replace_binding(api, name, &replacement).await?;
        self.codec
            .discard(namespace, &original_annotations, ORIGINAL_ROLE_REF_ANNOTATION)
            .await?;
        info!("Restored rolebinding {}/{}", namespace, name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SuspensionStrategy for RbacStrategy {
    fn name(&self) -> &'static str {
        RBAC_STRATEGY
    }

    fn is_supported(&self, resource_kind: &str) -> bool {
        resource_kind == "rolebindings"
    }

    async fn suspend(&self, namespace: &str) -> Result<(), ControllerError> {
        let (suspended, found) = self.cache.is_suspended(namespace, self.name())?;
        if found && suspended {
            debug!("RBAC scope for {} already suspended (cache hit)", namespace);
            return Ok(());
        }

        self.ensure_restricted_role(namespace).await?;

        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        let mut total = 0;
        let mut failed = 0;
        for binding in list.items {
            let Some(name) = binding.metadata.name.clone() else {
                continue;
            };
            if is_system_binding(&name, &binding.role_ref.name) {
                debug!("Skipping system rolebinding {}/{}", namespace, name);
                continue;
            }
            if Self::is_suspended(&binding) {
                debug!("Rolebinding {}/{} already swapped", namespace, name);
                continue;
            }
            total += 1;
            if let Err(e) = self.suspend_binding(&api, namespace, &name, &binding).await {
                warn!("Failed to swap rolebinding {}/{}: {}", namespace, name, e);
                failed += 1;
            }
        }

        if kind_exceeds_failure_threshold(total, failed) {
            return Err(ControllerError::Strategy {
                strategy: RBAC_STRATEGY,
                message: format!(
                    "{}/{} rolebindings failed to suspend in {}",
                    failed, total, namespace
                ),
            });
        }

        self.cache.set_suspended(namespace, self.name(), true)?;
        Ok(())
    }

    async fn resume(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        let mut total = 0;
        let mut failed = 0;
        for binding in list.items {
            let Some(name) = binding.metadata.name.clone() else {
                continue;
            };
            if !Self::is_suspended(&binding) {
                continue;
            }
            total += 1;
            if let Err(e) = self.resume_binding(&api, namespace, &name, &binding).await {
                warn!("Failed to restore rolebinding {}/{}: {}", namespace, name, e);
                failed += 1;
            }
        }

        if kind_exceeds_failure_threshold(total, failed) {
            return Err(ControllerError::Strategy {
                strategy: RBAC_STRATEGY,
                message: format!(
                    "{}/{} rolebindings failed to restore in {}",
                    failed, total, namespace
                ),
            });
        }

        // Only once every binding points away from it again.
        self.delete_restricted_role(namespace).await?;
        self.cache.set_suspended(namespace, self.name(), false)?;
        Ok(())
    }
}
