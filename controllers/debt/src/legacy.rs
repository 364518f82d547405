//! Per-resource suspend/resume routines predating the strategy layer.
//!
//! These cover kinds not yet migrated to the strategy abstraction: KubeBlocks
//! clusters (stopped through an OpsRequest rather than mutated directly),
//! orphan pods, CronJobs, resource quotas, and object-storage credentials.
//! They run as one fan-out phase alongside the phase-1 strategies; any single
//! failure fails the phase, and the outer reconciliation retry is the only
//! retry they get.

use crate::annotations::{
    ORIGINAL_SCHEDULER_ANNOTATION, SUSPENDED_ANNOTATION, SUSPENDED_TIME_ANNOTATION,
};
use crate::error::ControllerError;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Pod, ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use objectstorage_client::{ObjectStorageClientTrait, ObjectStorageError, UserStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scheduler name assigned to suspended orphan pods. No scheduler by this
/// name exists, so the recreated pod stays Pending until resume.
pub const SUSPEND_SCHEDULER_NAME: &str = "debt-suspend-scheduler";

/// Zero-resource quota injected into a suspended namespace
pub const DEBT_QUOTA_NAME: &str = "debt-limit0";

const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";
const KUBEBLOCKS_GROUP: &str = "apps.kubeblocks.io";
const KUBEBLOCKS_VERSION: &str = "v1alpha1";
const MAX_NAME_LEN: usize = 63;

/// How long to wait for a deleted pod to disappear before recreating it
const POD_GONE_TIMEOUT: Duration = Duration::from_secs(30);
const POD_GONE_POLL: Duration = Duration::from_millis(500);

/// Tenant namespaces are named `ns-{user}`; the trailing part is the
/// object-storage access key.
pub(crate) fn storage_user_for_namespace(namespace: &str) -> Option<&str> {
    namespace.strip_prefix("ns-").filter(|u| !u.is_empty())
}

fn opsrequest_name(verb: &str, cluster: &str) -> String {
    let mut name = format!("debt-{}-{}", verb, cluster).to_lowercase();
    name.truncate(MAX_NAME_LEN);
    name.trim_matches('-').to_string()
}

/// Flip the tenant's object-storage credentials. Missing users are the
/// "tenant never provisioned storage" case, not an error.
async fn set_storage_status(
    storage: &dyn ObjectStorageClientTrait,
    namespace: &str,
    status: UserStatus,
) -> Result<(), ControllerError> {
    let Some(user) = storage_user_for_namespace(namespace) else {
        debug!("Namespace {} has no storage user mapping", namespace);
        return Ok(());
    };
    match storage.set_user_status(user, status).await {
        Ok(()) => {
            info!("Set object-storage user {} to {}", user, status.as_str());
            Ok(())
        }
        Err(ObjectStorageError::UserNotFound(_)) => {
            debug!("No object-storage user {} for {}", user, namespace);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Suspend/resume routines for the not-yet-migrated resource kinds.
pub struct LegacyFunctions {
    client: Client,
    object_storage: Option<Arc<dyn ObjectStorageClientTrait>>,
}

impl LegacyFunctions {
    /// Create the legacy phase. `object_storage` is optional; clusters
    /// without a storage deployment simply skip that routine.
    pub fn new(
        client: Client,
        object_storage: Option<Arc<dyn ObjectStorageClientTrait>>,
    ) -> Self {
        Self {
            client,
            object_storage,
        }
    }

    /// Run all legacy suspend routines; the first error fails the phase.
    pub async fn suspend(&self, namespace: &str) -> Result<(), ControllerError> {
        tokio::try_join!(
            self.stop_kubeblocks_clusters(namespace),
            self.suspend_orphan_pods(namespace),
            self.set_cronjobs_suspended(namespace, true),
            self.apply_zero_quota(namespace),
            self.set_object_storage(namespace, UserStatus::Disabled),
        )?;
        Ok(())
    }

    /// Run all legacy resume routines; the first error fails the phase.
    pub async fn resume(&self, namespace: &str) -> Result<(), ControllerError> {
        tokio::try_join!(
            self.start_kubeblocks_clusters(namespace),
            self.resume_orphan_pods(namespace),
            self.set_cronjobs_suspended(namespace, false),
            self.remove_zero_quota(namespace),
            self.set_object_storage(namespace, UserStatus::Enabled),
        )?;
        Ok(())
    }

    // ---- KubeBlocks ----

    fn kubeblocks_api(&self, namespace: &str, kind: &str, plural: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(KUBEBLOCKS_GROUP, KUBEBLOCKS_VERSION, kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, plural);
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    async fn stop_kubeblocks_clusters(&self, namespace: &str) -> Result<(), ControllerError> {
        self.request_kubeblocks_ops(namespace, "Stop").await
    }

    async fn start_kubeblocks_clusters(&self, namespace: &str) -> Result<(), ControllerError> {
        self.request_kubeblocks_ops(namespace, "Start").await
    }

    /// Clusters are stopped/started through OpsRequest objects rather than by
    /// mutating the cluster spec; the KubeBlocks operator owns the rollout.
    async fn request_kubeblocks_ops(
        &self,
        namespace: &str,
        ops_type: &str,
    ) -> Result<(), ControllerError> {
        let clusters = self.kubeblocks_api(namespace, "Cluster", "clusters");
        let list = match clusters.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("KubeBlocks not installed, skipping {} ops", ops_type);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let ops_gvk = GroupVersionKind::gvk(KUBEBLOCKS_GROUP, KUBEBLOCKS_VERSION, "OpsRequest");
        let ops_ar = ApiResource::from_gvk_with_plural(&ops_gvk, "opsrequests");
        let ops_api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &ops_ar);

        for cluster in list.items {
            let Some(cluster_name) = cluster.metadata.name.clone() else {
                continue;
            };
            let ops_name = opsrequest_name(&ops_type.to_lowercase(), &cluster_name);
            let mut ops = DynamicObject::new(&ops_name, &ops_ar);
            ops.data = json!({
                "spec": {
                    "clusterRef": cluster_name,
                    "type": ops_type,
                    "ttlSecondsAfterSucceed": 1,
                }
            });

            match ops_api.create(&PostParams::default(), &ops).await {
                Ok(_) => info!(
                    "Created {} OpsRequest for cluster {}/{}",
                    ops_type, namespace, cluster_name
                ),
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    debug!(
                        "OpsRequest {} already exists in {}",
                        ops_name, namespace
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // ---- Orphan pods ----

    /// Pods with no owner reference have no controller to recreate them, so
    /// they are swapped onto a non-existent scheduler by delete-and-recreate.
    async fn suspend_orphan_pods(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;

        for pod in pods.items {
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            if !Self::is_orphan(&pod) || pod.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let scheduler = pod
                .spec
                .as_ref()
                .and_then(|s| s.scheduler_name.clone())
                .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string());
            if scheduler == SUSPEND_SCHEDULER_NAME {
                debug!("Orphan pod {}/{} already suspended", namespace, name);
                continue;
            }

            let mut replacement = Self::sanitized_clone(&pod, namespace, &name);
            let annotations = replacement.metadata.annotations.get_or_insert_default();
            annotations.insert(ORIGINAL_SCHEDULER_ANNOTATION.to_string(), scheduler);
            annotations.insert(SUSPENDED_ANNOTATION.to_string(), "true".to_string());
            annotations.insert(
                SUSPENDED_TIME_ANNOTATION.to_string(),
                chrono::Utc::now().to_rfc3339(),
            );
            if let Some(spec) = replacement.spec.as_mut() {
                spec.scheduler_name = Some(SUSPEND_SCHEDULER_NAME.to_string());
            }

            self.recreate_pod(&api, namespace, &name, &replacement).await?;
            info!("Suspended orphan pod {}/{}", namespace, name);
        }
        Ok(())
    }

    async fn resume_orphan_pods(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;

        for pod in pods.items {
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            let suspended = pod
                .spec
                .as_ref()
                .and_then(|s| s.scheduler_name.as_deref())
                .is_some_and(|s| s == SUSPEND_SCHEDULER_NAME);
            if !suspended || pod.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let original = pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ORIGINAL_SCHEDULER_ANNOTATION))
                .cloned()
                .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string());

            let mut replacement = Self::sanitized_clone(&pod, namespace, &name);
            if let Some(annotations) = replacement.metadata.annotations.as_mut() {
                annotations.remove(ORIGINAL_SCHEDULER_ANNOTATION);
                annotations.remove(SUSPENDED_ANNOTATION);
                annotations.remove(SUSPENDED_TIME_ANNOTATION);
            }
            if let Some(spec) = replacement.spec.as_mut() {
                spec.scheduler_name = Some(original);
            }

            self.recreate_pod(&api, namespace, &name, &replacement).await?;
            info!("Resumed orphan pod {}/{}", namespace, name);
        }
        Ok(())
    }

    fn is_orphan(pod: &Pod) -> bool {
        pod.metadata
            .owner_references
            .as_ref()
            .is_none_or(|refs| refs.is_empty())
    }

    /// Copy of a pod with server-populated fields stripped so it can be
    /// recreated. `nodeName` is cleared, otherwise the replacement would
    /// bypass scheduling entirely.
    fn sanitized_clone(pod: &Pod, namespace: &str, name: &str) -> Pod {
        let mut spec = pod.spec.clone();
        if let Some(spec) = spec.as_mut() {
            spec.node_name = None;
        }
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: pod.metadata.labels.clone(),
                annotations: pod.metadata.annotations.clone(),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    /// Delete, wait for the old pod to actually disappear, then create the
    /// replacement. Creating while the original is still terminating would
    /// fail with AlreadyExists.
    async fn recreate_pod(
        &self,
        api: &Api<Pod>,
        namespace: &str,
        name: &str,
        replacement: &Pod,
    ) -> Result<(), ControllerError> {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        let deadline = tokio::time::Instant::now() + POD_GONE_TIMEOUT;
        while api.get_opt(name).await?.is_some() {
            if tokio::time::Instant::now() >= deadline {
                return Err(ControllerError::Reconciliation(format!(
                    "pod {}/{} still terminating after {:?}",
                    namespace, name, POD_GONE_TIMEOUT
                )));
            }
            tokio::time::sleep(POD_GONE_POLL).await;
        }

        api.create(&PostParams::default(), replacement).await?;
        Ok(())
    }

    // ---- CronJobs ----

    /// CronJobs carry a native suspension flag; only jobs this controller
    /// suspended get unsuspended, so a user's own paused jobs stay paused.
    async fn set_cronjobs_suspended(
        &self,
        namespace: &str,
        suspend: bool,
    ) -> Result<(), ControllerError> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        let jobs = api.list(&ListParams::default()).await?;

        for job in jobs.items {
            let Some(name) = job.metadata.name.clone() else {
                continue;
            };
            let marked = job
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(SUSPENDED_ANNOTATION))
                .is_some_and(|v| v == "true");
            let already_suspended = job
                .spec
                .as_ref()
                .and_then(|s| s.suspend)
                .unwrap_or(false);

            let patch = if suspend {
                if marked || already_suspended {
                    continue;
                }
                json!({
                    "metadata": {
                        "annotations": {
                            SUSPENDED_ANNOTATION: "true",
                            SUSPENDED_TIME_ANNOTATION: chrono::Utc::now().to_rfc3339(),
                        }
                    },
                    "spec": { "suspend": true }
                })
            } else {
                if !marked {
                    continue;
                }
                json!({
                    "metadata": {
                        "annotations": {
                            SUSPENDED_ANNOTATION: null,
                            SUSPENDED_TIME_ANNOTATION: null,
                        }
                    },
                    "spec": { "suspend": false }
                })
            };

            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            info!(
                "Set cronjob {}/{} suspend={}",
                namespace, name, suspend
            );
        }
        Ok(())
    }

    // ---- Zero quota ----

    async fn apply_zero_quota(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        let quota = ResourceQuota {
            metadata: ObjectMeta {
                name: Some(DEBT_QUOTA_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(
                    [
                        ("limits.cpu", "0"),
                        ("limits.memory", "0"),
                        ("requests.storage", "0"),
                    ]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                    .collect(),
                ),
                ..Default::default()
            }),
            status: None,
        };

        match api.create(&PostParams::default(), &quota).await {
            Ok(_) => info!("Applied zero quota to {}", namespace),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("Zero quota already present in {}", namespace);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn remove_zero_quota(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(DEBT_QUOTA_NAME, &DeleteParams::default()).await {
            Ok(_) => info!("Removed zero quota from {}", namespace),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Zero quota already absent from {}", namespace);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    // ---- Object storage ----

    async fn set_object_storage(
        &self,
        namespace: &str,
        status: UserStatus,
    ) -> Result<(), ControllerError> {
        let Some(storage) = self.object_storage.as_deref() else {
            debug!("No object-storage client configured, skipping");
            return Ok(());
        };
        if let Err(e) = set_storage_status(storage, namespace, status).await {
            warn!("Object-storage update for {} failed: {}", namespace, e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectstorage_client::{MockObjectStorageClient, StorageUser};

    #[test]
    fn test_storage_user_mapping() {
        assert_eq!(storage_user_for_namespace("ns-alice"), Some("alice"));
        assert_eq!(storage_user_for_namespace("ns-"), None);
        assert_eq!(storage_user_for_namespace("kube-system"), None);
        assert_eq!(storage_user_for_namespace("alice"), None);
    }

    #[test]
    fn test_opsrequest_name_is_dns_safe() {
        assert_eq!(opsrequest_name("stop", "pg-main"), "debt-stop-pg-main");
        let long = opsrequest_name("start", &"c".repeat(80));
        assert!(long.len() <= 63);
        assert!(!long.ends_with('-'));
    }

    #[tokio::test]
    async fn test_disable_storage_user() {
        let mock = MockObjectStorageClient::new("http://storage.test");
        mock.add_user(StorageUser {
            access_key: "alice".to_string(),
            status: UserStatus::Enabled,
            policy_name: None,
        });

        set_storage_status(&mock, "ns-alice", UserStatus::Disabled)
            .await
            .unwrap();
        assert_eq!(
            mock.status_calls(),
            vec![("alice".to_string(), UserStatus::Disabled)]
        );
    }

    #[tokio::test]
    async fn test_missing_storage_user_is_not_an_error() {
        let mock = MockObjectStorageClient::new("http://storage.test");
        set_storage_status(&mock, "ns-ghost", UserStatus::Disabled)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_tenant_namespace_skips_storage() {
        let mock = MockObjectStorageClient::new("http://storage.test");
        set_storage_status(&mock, "kube-system", UserStatus::Disabled)
            .await
            .unwrap();
        assert!(mock.status_calls().is_empty());
    }
}
