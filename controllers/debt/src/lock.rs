//! ConfigMap-based distributed mutual exclusion.
//!
//! Kubernetes controllers commonly run multiple replicas; without this lock
//! two replicas reconciling the same namespace could double-apply or race on
//! backup/restore and corrupt the single-backup invariant. The lock is a
//! "poor man's mutex" built from the API server's atomic create: creating the
//! lock ConfigMap fails with AlreadyExists when another holder owns it. The
//! protected section runs under a hard 30-second deadline, and release is
//! carried by a drop guard: the ConfigMap is deleted on success, error,
//! timeout, and also when the holding future is dropped or panics.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

/// Upper bound on the lock-protected section
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_NAME_LEN: usize = 63;

/// Serializes suspend/resume for one namespace across controller replicas.
#[derive(Clone)]
pub struct DistributedLock {
    client: Client,
    system_namespace: String,
    holder: String,
}

/// Owns a held lock. Dropping the guard without calling [`LockGuard::release`]
/// releases the lock out-of-band, so a cancelled or panicking holder cannot
/// leave the ConfigMap behind.
struct LockGuard {
    api: Api<ConfigMap>,
    name: String,
    released: bool,
}

impl LockGuard {
    async fn delete(api: Api<ConfigMap>, name: String) {
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => debug!("Released lock {}", name),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Lock {} already released", name);
            }
            Err(e) => {
                // A leaked lock blocks the namespace until cleared by an
                // operator; make that loud.
                error!("Failed to release lock {}: {}", name, e);
            }
        }
    }

    /// Release on the normal exit path.
    async fn release(mut self) {
        self.released = true;
        let api = self.api.clone();
        let name = std::mem::take(&mut self.name);
        Self::delete(api, name).await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // The holding future was dropped or unwound; delete on a spawned
        // task since Drop cannot await.
        let api = self.api.clone();
        let name = std::mem::take(&mut self.name);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::delete(api, name));
            }
            Err(_) => error!("Lock {} leaked: no runtime left to release it on", name),
        }
    }
}

impl DistributedLock {
    /// Create a lock bound to the system namespace. `holder` identifies this
    /// replica in the lock record (typically the pod name).
    pub fn new(client: Client, system_namespace: &str, holder: &str) -> Self {
        Self {
            client,
            system_namespace: system_namespace.to_string(),
            holder: holder.to_string(),
        }
    }

    /// Deterministic lock ConfigMap name for `(operation, namespace)`.
    pub fn lock_name(operation: &str, namespace: &str) -> String {
        let mut name = format!("debt-{}-{}", operation, namespace).to_lowercase();
        name.truncate(MAX_NAME_LEN);
        name.trim_matches('-').to_string()
    }

    /// Run `fut` while holding the `(operation, namespace)` lock.
    ///
    /// Returns `LockBusy` without blocking or retrying when another holder
    /// owns the lock; the caller's outer reconciliation loop gets re-invoked
    /// later by the event source. On acquisition the future runs under
    /// [`LOCK_TIMEOUT`] and the lock is released whether it succeeds, fails,
    /// times out, or is dropped before completion.
    pub async fn with_lock<T, F>(
        &self,
        namespace: &str,
        operation: &str,
        fut: F,
    ) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, ControllerError>>,
    {
        let name = Self::lock_name(operation, namespace);
        self.acquire(&name, operation, namespace).await?;
        debug!("Acquired lock {} for {}/{}", name, operation, namespace);
        let guard = LockGuard {
            api: Api::namespaced(self.client.clone(), &self.system_namespace),
            name,
            released: false,
        };

        let outcome = tokio::time::timeout(LOCK_TIMEOUT, fut).await;
        guard.release().await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ControllerError::LockTimeout(format!(
                "{} of namespace {} exceeded {:?}",
                operation, namespace, LOCK_TIMEOUT
            ))),
        }
    }

    async fn acquire(
        &self,
        name: &str,
        operation: &str,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        let mut data = BTreeMap::new();
        data.insert("holder".to_string(), self.holder.clone());
        data.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        let cm = ConfigMap {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.system_namespace.clone()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.system_namespace);
        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                info!(
                    "Lock {} already held, skipping {} of namespace {}",
                    name, operation, namespace
                );
                Err(ControllerError::LockBusy(format!(
                    "{} of namespace {} is already in progress",
                    operation, namespace
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_client, CannedResponse};

    #[test]
    fn test_lock_name_format() {
        assert_eq!(
            DistributedLock::lock_name("suspend", "ns-tenant-a"),
            "debt-suspend-ns-tenant-a"
        );
        assert_eq!(
            DistributedLock::lock_name("resume", "ns-tenant-a"),
            "debt-resume-ns-tenant-a"
        );
    }

    #[test]
    fn test_lock_name_respects_k8s_name_limit() {
        let namespace = "ns-".to_string() + &"a".repeat(80);
        let name = DistributedLock::lock_name("suspend", &namespace);
        assert!(name.len() <= 63);
        assert!(!name.ends_with('-'));
    }

    #[tokio::test]
    async fn test_lock_wraps_protected_section_with_create_and_delete() {
        let (client, calls) = mock_client(vec![]);
        let lock = DistributedLock::new(client, "debt-system", "pod-a");

        lock.with_lock("ns-a", "suspend", async { Ok::<_, ControllerError>(()) })
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let methods: Vec<&str> = calls.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(methods, vec!["POST", "DELETE"]);
        assert!(calls[1].1.ends_with("/debt-suspend-ns-a"));
    }

    #[tokio::test]
    async fn test_lock_released_when_holder_is_dropped_mid_flight() {
        let (client, calls) = mock_client(vec![]);
        let lock = DistributedLock::new(client, "debt-system", "pod-a");

        let holder = tokio::spawn(async move {
            lock.with_lock(
                "ns-a",
                "suspend",
                std::future::pending::<Result<(), ControllerError>>(),
            )
            .await
        });
        // Let acquisition finish, then cancel the holder the way a dropped
        // reconciliation would.
        tokio::time::sleep(Duration::from_millis(50)).await;
        holder.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = calls.lock().unwrap();
        assert!(calls
            .iter()
            .any(|(m, p)| m == "POST" && p.ends_with("/configmaps")));
        assert!(calls
            .iter()
            .any(|(m, p)| m == "DELETE" && p.ends_with("/debt-suspend-ns-a")));
    }

    #[tokio::test]
    async fn test_lock_busy_does_not_touch_the_foreign_lock() {
        let (client, calls) = mock_client(vec![CannedResponse {
            method: "POST",
            path_fragment: "configmaps",
            status: 409,
            body: r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Failure","message":"already exists","reason":"AlreadyExists","code":409}"#,
        }]);
        let lock = DistributedLock::new(client, "debt-system", "pod-a");

        let err = lock
            .with_lock("ns-a", "suspend", async { Ok::<_, ControllerError>(()) })
            .await
            .unwrap_err();
        assert!(err.is_lock_busy());
        assert!(!calls.lock().unwrap().iter().any(|(m, _)| m == "DELETE"));
    }
}
