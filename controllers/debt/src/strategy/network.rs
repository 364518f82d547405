//! Network-resource suspension strategy.
//!
//! Handles the traffic-carrying kinds: Ingress and Service (typed), Gateway,
//! VirtualService and DestinationRule (dynamic). Suspension backs up the
//! traffic-carrying fragment through the codec and clears it; resume loads the
//! backup, restores the fragment, and deletes the backup. System-reserved
//! names are never touched.
//!
//! Per-kind failure tolerance: a kind's run is still considered successful if
//! fewer than half of its instances failed; at or above half, the whole kind
//! is reported failed.

use super::{SuspensionStrategy, NETWORK_STRATEGY};
use crate::annotations::{
    ORIGINAL_HOSTS_ANNOTATION, ORIGINAL_HTTP_ANNOTATION, ORIGINAL_PORTS_ANNOTATION,
    ORIGINAL_SERVERS_ANNOTATION, SUSPENDED_ANNOTATION, SUSPENDED_TIME_ANNOTATION,
};
use crate::backup::BackupCodec;
use crate::cache::ResourceCache;
use crate::config::SuspensionConfig;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::networking::v1::{Ingress, IngressRule};
use kube::api::{DynamicObject, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Names that belong to the cluster, never to a tenant.
const SYSTEM_RESERVED_NAMES: [&str; 3] = ["kubernetes", "kube-dns", "kube-proxy"];

/// True for resources the tenant must not lose (cluster plumbing).
pub(crate) fn is_system_resource_name(name: &str) -> bool {
    SYSTEM_RESERVED_NAMES.contains(&name)
}

/// Per-kind tolerance: the kind fails once half or more of its instances do.
pub(crate) fn kind_exceeds_failure_threshold(total: usize, failed: usize) -> bool {
    failed > 0 && failed * 2 >= total
}

/// Suspends and resumes traffic-bearing network resources.
pub struct NetworkStrategy {
    client: Client,
    cache: ResourceCache,
    codec: BackupCodec,
    config: Arc<SuspensionConfig>,
}

impl NetworkStrategy {
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

    fn suspended_entries() -> Vec<(String, String)> {
        vec![
            (SUSPENDED_ANNOTATION.to_string(), "true".to_string()),
            (
                SUSPENDED_TIME_ANNOTATION.to_string(),
                chrono::Utc::now().to_rfc3339(),
            ),
        ]
    }

    fn is_suspended(annotations: Option<&BTreeMap<String, String>>) -> bool {
        annotations
            .and_then(|a| a.get(SUSPENDED_ANNOTATION))
            .is_some_and(|v| v == "true")
    }

    /// Merge-patch body that stamps annotations and clears a spec field.
    fn clear_patch(entries: &[(String, String)], field: Option<&str>) -> Value {
        let mut annotations = serde_json::Map::new();
        for (k, v) in entries {
            annotations.insert(k.clone(), Value::String(v.clone()));
        }
        let mut patch = json!({ "metadata": { "annotations": Value::Object(annotations) } });
        if let Some(field) = field {
            patch["spec"] = json!({ field: [] });
        }
        patch
    }

    /// Merge-patch body that removes our annotations and restores a fragment.
    fn restore_patch(backup_key: &str, field: Option<(&str, &Value)>) -> Value {
        let mut annotations = serde_json::Map::new();
        for key in BackupCodec::annotation_keys(backup_key) {
            annotations.insert(key, Value::Null);
        }
        annotations.insert(SUSPENDED_ANNOTATION.to_string(), Value::Null);
        annotations.insert(SUSPENDED_TIME_ANNOTATION.to_string(), Value::Null);
        let mut patch = json!({ "metadata": { "annotations": Value::Object(annotations) } });
        if let Some((field, fragment)) = field {
            patch["spec"] = json!({ field: fragment });
        }
        patch
    }

    // ---- Ingress ----

    async fn suspend_ingresses(&self, namespace: &str) -> Result<(usize, usize), ControllerError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        let mut total = 0;
        let mut failed = 0;
        for ingress in list.items {
            let Some(name) = ingress.metadata.name.clone() else {
                continue;
            };
            if is_system_resource_name(&name) {
                continue;
            }
            total += 1;
            if let Err(e) = self.suspend_ingress(&api, namespace, &name, &ingress).await {
                warn!("Failed to suspend ingress {}/{}: {}", namespace, name, e);
                failed += 1;
            }
        }
        Ok((total, failed))
    }

    async fn suspend_ingress(
        &self,
        api: &Api<Ingress>,
        namespace: &str,
        name: &str,
        ingress: &Ingress,
    ) -> Result<(), ControllerError> {
        if Self::is_suspended(ingress.metadata.annotations.as_ref()) {
            debug!("Ingress {}/{} already suspended", namespace, name);
            return Ok(());
        }

        let rules = ingress
            .spec
            .as_ref()
            .and_then(|s| s.rules.clone())
            .unwrap_or_default();
        let payload = serde_json::to_value(&rules)?;
        let mut entries = self
            .codec
            .store(
                namespace,
                "ingress",
                name,
                ORIGINAL_HOSTS_ANNOTATION,
                &payload,
                self.config.backup_size_limit("ingresses"),
            )
            .await?;
        entries.extend(Self::suspended_entries());

        let patch = Self::clear_patch(&entries, Some("rules"));
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Suspended ingress {}/{}", namespace, name);
        Ok(())
    }

    async fn resume_ingresses(&self, namespace: &str) -> Result<(usize, usize), ControllerError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        let mut total = 0;
        let mut failed = 0;
        for ingress in list.items {
            let Some(name) = ingress.metadata.name.clone() else {
                continue;
            };
            if is_system_resource_name(&name) {
                continue;
            }
            total += 1;
            if let Err(e) = self.resume_ingress(&api, namespace, &name, &ingress).await {
                warn!("Failed to resume ingress {}/{}: {}", namespace, name, e);
                failed += 1;
            }
        }
        Ok((total, failed))
    }

    async fn resume_ingress(
        &self,
        api: &Api<Ingress>,
        namespace: &str,
        name: &str,
        ingress: &Ingress,
    ) -> Result<(), ControllerError> {
        let annotations = ingress.metadata.annotations.clone().unwrap_or_default();
        let Some(payload) = self
            .codec
            .load(namespace, &annotations, ORIGINAL_HOSTS_ANNOTATION)
            .await?
        else {
            // No discoverable backup: never suspended, or already restored.
            debug!("Ingress {}/{} has no backup, skipping", namespace, name);
            return Ok(());
        };
        BackupCodec::validate_fragment(&payload)?;
        let rules: Vec<IngressRule> = serde_json::from_value(payload.clone()).map_err(|e| {
            ControllerError::BackupCorrupted(format!("ingress rules for {}: {}", name, e))
        })?;

        let patch = Self::restore_patch(
            ORIGINAL_HOSTS_ANNOTATION,
            Some(("rules", &serde_json::to_value(&rules)?)),
        );
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        self.codec
            .discard(namespace, &annotations, ORIGINAL_HOSTS_ANNOTATION)
            .await?;
        info!("Resumed ingress {}/{}", namespace, name);
        Ok(())
    }

    // ---- Service ----

    async fn suspend_services(&self, namespace: &str) -> Result<(usize, usize), ControllerError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        let mut total = 0;
        let mut failed = 0;
        for service in list.items {
            let Some(name) = service.metadata.name.clone() else {
                continue;
            };
            if is_system_resource_name(&name) {
                continue;
            }
            total += 1;
            if let Err(e) = self.suspend_service(&api, namespace, &name, &service).await {
                warn!("Failed to suspend service {}/{}: {}", namespace, name, e);
                failed += 1;
            }
        }
        Ok((total, failed))
    }

    async fn suspend_service(
        &self,
        api: &Api<Service>,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<(), ControllerError> {
        if Self::is_suspended(service.metadata.annotations.as_ref()) {
            debug!("Service {}/{} already suspended", namespace, name);
            return Ok(());
        }

        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.clone())
            .unwrap_or_default();
        let payload = serde_json::to_value(&ports)?;
        let mut entries = self
            .codec
            .store(
                namespace,
                "service",
                name,
                ORIGINAL_PORTS_ANNOTATION,
                &payload,
                self.config.backup_size_limit("services"),
            )
            .await?;
        entries.extend(Self::suspended_entries());

        // Merge patch only touches ports; clusterIP stays untouched.
        let patch = Self::clear_patch(&entries, Some("ports"));
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Suspended service {}/{}", namespace, name);
        Ok(())
    }

    async fn resume_services(&self, namespace: &str) -> Result<(usize, usize), ControllerError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        let mut total = 0;
        let mut failed = 0;
        for service in list.items {
            let Some(name) = service.metadata.name.clone() else {
                continue;
            };
            if is_system_resource_name(&name) {
                continue;
            }
            total += 1;
            if let Err(e) = self.resume_service(&api, namespace, &name, &service).await {
                warn!("Failed to resume service {}/{}: {}", namespace, name, e);
                failed += 1;
            }
        }
        Ok((total, failed))
    }

    async fn resume_service(
        &self,
        api: &Api<Service>,
        namespace: &str,
        name: &str,
        service: &Service,
    ) -> Result<(), ControllerError> {
        let annotations = service.metadata.annotations.clone().unwrap_or_default();
        let Some(payload) = self
            .codec
            .load(namespace, &annotations, ORIGINAL_PORTS_ANNOTATION)
            .await?
        else {
            debug!("Service {}/{} has no backup, skipping", namespace, name);
            return Ok(());
        };
        BackupCodec::validate_fragment(&payload)?;
        let ports: Vec<ServicePort> = serde_json::from_value(payload.clone()).map_err(|e| {
            ControllerError::BackupCorrupted(format!("service ports for {}: {}", name, e))
        })?;

        let patch = Self::restore_patch(
            ORIGINAL_PORTS_ANNOTATION,
            Some(("ports", &serde_json::to_value(&ports)?)),
        );
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        self.codec
            .discard(namespace, &annotations, ORIGINAL_PORTS_ANNOTATION)
            .await?;
        info!("Resumed service {}/{}", namespace, name);
        Ok(())
    }

    // ---- Dynamic kinds (Gateway, VirtualService, DestinationRule) ----

    fn dynamic_api(&self, namespace: &str, kind_key: &str) -> Option<Api<DynamicObject>> {
        self.config
            .api_resource(kind_key)
            .map(|ar| Api::namespaced_with(self.client.clone(), namespace, &ar))
    }

    /// Suspend a dynamic kind. `fragment` pairs the traffic-carrying spec
    /// field with its backup annotation key; `None` means mark-suspended only
    /// (DestinationRule).
    async fn suspend_dynamic_kind(
        &self,
        namespace: &str,
        kind_key: &str,
        fragment: Option<(&str, &str)>,
    ) -> Result<(usize, usize), ControllerError> {
        let Some(api) = self.dynamic_api(namespace, kind_key) else {
            return Ok((0, 0));
        };
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                // CRD not installed in this cluster
                debug!("{} API not available, skipping", kind_key);
                return Ok((0, 0));
            }
            Err(e) => return Err(e.into()),
        };

        let mut total = 0;
        let mut failed = 0;
        for obj in list.items {
            let Some(name) = obj.metadata.name.clone() else {
                continue;
            };
            if is_system_resource_name(&name) {
                continue;
            }
            total += 1;
            if let Err(e) = self
                .suspend_dynamic(&api, namespace, kind_key, &name, &obj, fragment)
                .await
            {
                warn!("Failed to suspend {} {}/{}: {}", kind_key, namespace, name, e);
                failed += 1;
            }
        }
        Ok((total, failed))
    }

    async fn suspend_dynamic(
        &self,
        api: &Api<DynamicObject>,
        namespace: &str,
        kind_key: &str,
        name: &str,
        obj: &DynamicObject,
        fragment: Option<(&str, &str)>,
    ) -> Result<(), ControllerError> {
        if Self::is_suspended(obj.metadata.annotations.as_ref()) {
            debug!("{} {}/{} already suspended", kind_key, namespace, name);
            return Ok(());
        }

        let mut entries = Vec::new();
        if let Some((field, backup_key)) = fragment {
            let payload = obj
                .data
                .get("spec")
                .and_then(|s| s.get(field))
                .cloned()
                .unwrap_or_else(|| json!([]));
            entries = self
                .codec
                .store(
                    namespace,
                    kind_key,
                    name,
                    backup_key,
                    &payload,
                    self.config.backup_size_limit(kind_key),
                )
                .await?;
        }
        entries.extend(Self::suspended_entries());

        let patch = Self::clear_patch(&entries, fragment.map(|(f, _)| f));
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Suspended {} {}/{}", kind_key, namespace, name);
        Ok(())
    }

    async fn resume_dynamic_kind(
        &self,
        namespace: &str,
        kind_key: &str,
        fragment: Option<(&str, &str)>,
    ) -> Result<(usize, usize), ControllerError> {
        let Some(api) = self.dynamic_api(namespace, kind_key) else {
            return Ok((0, 0));
        };
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok((0, 0)),
            Err(e) => return Err(e.into()),
        };

        let mut total = 0;
        let mut failed = 0;
        for obj in list.items {
            let Some(name) = obj.metadata.name.clone() else {
                continue;
            };
            if is_system_resource_name(&name) {
                continue;
            }
            total += 1;
            if let Err(e) = self
                .resume_dynamic(&api, namespace, kind_key, &name, &obj, fragment)
                .await
            {
                warn!("Failed to resume {} {}/{}: {}", kind_key, namespace, name, e);
                failed += 1;
            }
        }
        Ok((total, failed))
    }

    async fn resume_dynamic(
        &self,
        api: &Api<DynamicObject>,
        namespace: &str,
        kind_key: &str,
        name: &str,
        obj: &DynamicObject,
        fragment: Option<(&str, &str)>,
    ) -> Result<(), ControllerError> {
        let annotations = obj.metadata.annotations.clone().unwrap_or_default();

        match fragment {
            Some((field, backup_key)) => {
                let Some(payload) = self.codec.load(namespace, &annotations, backup_key).await?
                else {
                    debug!("{} {}/{} has no backup, skipping", kind_key, namespace, name);
                    return Ok(());
                };
                BackupCodec::validate_fragment(&payload)?;

                let patch = Self::restore_patch(backup_key, Some((field, &payload)));
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                self.codec.discard(namespace, &annotations, backup_key).await?;
            }
            None => {
                if !annotations.contains_key(SUSPENDED_ANNOTATION) {
                    return Ok(());
                }
                let patch = serde_json::json!({
                    "metadata": {
                        "annotations": {
                            SUSPENDED_ANNOTATION: null,
                            SUSPENDED_TIME_ANNOTATION: null,
                        }
                    }
                });
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
        }
        info!("Resumed {} {}/{}", kind_key, namespace, name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SuspensionStrategy for NetworkStrategy {
    fn name(&self) -> &'static str {
        NETWORK_STRATEGY
    }

    fn is_supported(&self, resource_kind: &str) -> bool {
        matches!(
            resource_kind,
            "ingresses" | "services" | "gateways" | "virtualservices" | "destinationrules"
        )
    }

    async fn suspend(&self, namespace: &str) -> Result<(), ControllerError> {
        let (suspended, found) = self.cache.is_suspended(namespace, self.name())?;
        if found && suspended {
            debug!(
                "Network scope for {} already suspended (cache hit)",
                namespace
            );
            return Ok(());
        }

        let mut failed_kinds = Vec::new();
        let runs: [(&str, (usize, usize)); 5] = [
            ("ingresses", self.suspend_ingresses(namespace).await?),
            ("services", self.suspend_services(namespace).await?),
            (
                "gateways",
                self.suspend_dynamic_kind(
                    namespace,
                    "gateways",
                    Some(("servers", ORIGINAL_SERVERS_ANNOTATION)),
                )
                .await?,
            ),
            (
                "virtualservices",
                self.suspend_dynamic_kind(
                    namespace,
                    "virtualservices",
                    Some(("http", ORIGINAL_HTTP_ANNOTATION)),
                )
                .await?,
            ),
            (
                "destinationrules",
                self.suspend_dynamic_kind(namespace, "destinationrules", None)
                    .await?,
            ),
        ];
        for (kind, (total, failed)) in runs {
            if kind_exceeds_failure_threshold(total, failed) {
                failed_kinds.push(format!("{} ({}/{} failed)", kind, failed, total));
            }
        }
        if !failed_kinds.is_empty() {
            return Err(ControllerError::Strategy {
                strategy: NETWORK_STRATEGY,
                message: format!("suspend failed for: {}", failed_kinds.join(", ")),
            });
        }

        self.cache.set_suspended(namespace, self.name(), true)?;
        Ok(())
    }

    async fn resume(&self, namespace: &str) -> Result<(), ControllerError> {
        let mut failed_kinds = Vec::new();
        let runs: [(&str, (usize, usize)); 5] = [
            ("ingresses", self.resume_ingresses(namespace).await?),
            ("services", self.resume_services(namespace).await?),
            (
                "gateways",
                self.resume_dynamic_kind(
                    namespace,
                    "gateways",
                    Some(("servers", ORIGINAL_SERVERS_ANNOTATION)),
                )
                .await?,
            ),
            (
                "virtualservices",
                self.resume_dynamic_kind(
                    namespace,
                    "virtualservices",
                    Some(("http", ORIGINAL_HTTP_ANNOTATION)),
                )
                .await?,
            ),
            (
                "destinationrules",
                self.resume_dynamic_kind(namespace, "destinationrules", None)
                    .await?,
            ),
        ];
        for (kind, (total, failed)) in runs {
            if kind_exceeds_failure_threshold(total, failed) {
                failed_kinds.push(format!("{} ({}/{} failed)", kind, failed, total));
            }
        }
        if !failed_kinds.is_empty() {
            return Err(ControllerError::Strategy {
                strategy: NETWORK_STRATEGY,
                message: format!("resume failed for: {}", failed_kinds.join(", ")),
            });
        }

        self.cache.set_suspended(namespace, self.name(), false)?;
        Ok(())
    }
}
