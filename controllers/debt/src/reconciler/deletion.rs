//! Bulk resource deletion for namespaces in final debt deletion.
//!
//! Deletes every tenant-owned resource kind with foreground propagation.
//! Each kind is attempted independently; failures are collected and reported
//! together so one stuck kind does not shield the rest from teardown.

use super::Reconciler;
use crate::error::ControllerError;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams};
use kube::Api;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

/// Dynamic CRD kinds torn down in addition to the typed ones. KubeBlocks
/// kinds are listed explicitly; the cert-manager and istio kinds come from
/// the suspension configuration table.
const KUBEBLOCKS_KINDS: [(&str, &str); 2] =
    [("Cluster", "clusters"), ("OpsRequest", "opsrequests")];

impl Reconciler {
    /// Delete all tenant resources in a namespace. Returns an error listing
    /// the kinds that could not be fully deleted; the caller requeues.
    pub(super) async fn delete_namespace_resources(
        &self,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        info!("Deleting all resources in namespace {}", namespace);
        let mut failed: Vec<String> = Vec::new();

        // Workloads first so nothing recreates the resources deleted below.
        self.try_delete::<Deployment>(namespace, "deployments", &mut failed).await;
        self.try_delete::<StatefulSet>(namespace, "statefulsets", &mut failed).await;
        self.try_delete::<DaemonSet>(namespace, "daemonsets", &mut failed).await;
        self.try_delete::<ReplicaSet>(namespace, "replicasets", &mut failed).await;
        self.try_delete::<CronJob>(namespace, "cronjobs", &mut failed).await;
        self.try_delete::<Job>(namespace, "jobs", &mut failed).await;
        self.try_delete::<Pod>(namespace, "pods", &mut failed).await;

        self.try_delete::<Service>(namespace, "services", &mut failed).await;
        self.try_delete::<Ingress>(namespace, "ingresses", &mut failed).await;
        self.try_delete::<PersistentVolumeClaim>(namespace, "persistentvolumeclaims", &mut failed)
            .await;
        self.try_delete::<ConfigMap>(namespace, "configmaps", &mut failed).await;
        self.try_delete::<Secret>(namespace, "secrets", &mut failed).await;
        self.try_delete::<ServiceAccount>(namespace, "serviceaccounts", &mut failed).await;

        for (kind, plural) in KUBEBLOCKS_KINDS {
            let gvk = GroupVersionKind::gvk("apps.kubeblocks.io", "v1alpha1", kind);
            let ar = ApiResource::from_gvk_with_plural(&gvk, plural);
            if let Err(e) = self.delete_dynamic_kind(namespace, &ar).await {
                warn!("Failed to delete {} in {}: {}", plural, namespace, e);
                failed.push(plural.to_string());
            }
        }
        for kind in ["certificates", "challenges", "gateways", "virtualservices", "destinationrules"]
        {
            let Some(ar) = self.config.api_resource(kind) else {
                continue;
            };
            if let Err(e) = self.delete_dynamic_kind(namespace, &ar).await {
                warn!("Failed to delete {} in {}: {}", kind, namespace, e);
                failed.push(kind.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Reconciliation(format!(
                "deletion incomplete in {} for: {}",
                namespace,
                failed.join(", ")
            )))
        }
    }

    async fn try_delete<K>(&self, namespace: &str, kind: &str, failed: &mut Vec<String>)
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + DeserializeOwned,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete_collection(&DeleteParams::foreground(), &ListParams::default())
            .await
        {
            Ok(_) => debug!("Deleted {} in {}", kind, namespace),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("No {} API in this cluster, skipping", kind);
            }
            Err(e) => {
                warn!("Failed to delete {} in {}: {}", kind, namespace, e);
                failed.push(kind.to_string());
            }
        }
    }

    /// CRD kinds may be absent from the cluster entirely; a 404 on list is
    /// the missing-CRD case, not a failure.
    async fn delete_dynamic_kind(
        &self,
        namespace: &str,
        ar: &ApiResource,
    ) -> Result<(), ControllerError> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, ar);
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for obj in list.items {
            let Some(name) = obj.metadata.name.as_deref() else {
                continue;
            };
            match api.delete(name, &DeleteParams::foreground()).await {
                Ok(_) => debug!("Deleted {} {}/{}", ar.plural, namespace, name),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
