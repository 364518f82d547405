//! Reconciliation state machine.
//!
//! This module contains the `Reconciler` struct that reads a tenant
//! namespace's debt-status annotation and dispatches to the suspend, resume,
//! or deletion orchestration. The orchestrations themselves live in the
//! submodules:
//! - `suspend`: phased strategy fan-out with transaction tracking
//! - `resume`: the inverse phase ordering
//! - `deletion`: bulk teardown of all tenant resources

mod deletion;
mod resume;
mod suspend;
#[cfg(test)]
mod suspend_test;

use crate::annotations::{DebtStatus, DEBT_STATUS_ANNOTATION};
use crate::backup::BackupCodec;
use crate::cache::ResourceCache;
use crate::config::SuspensionConfig;
use crate::error::ControllerError;
use crate::legacy::LegacyFunctions;
use crate::lock::DistributedLock;
use crate::metrics::DebtMetrics;
use crate::strategy::{
    CertificateStrategy, NetworkStrategy, RbacStrategy, SuspensionStrategy,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::PostParams;
use kube::{Api, Client};
use objectstorage_client::ObjectStorageClientTrait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue interval after a failed bulk deletion. Teardown involves slow
/// external subsystems (volumes, load balancers), so retries are spaced out
/// instead of surfacing as reconciliation errors.
pub const DELETION_RETRY_INTERVAL: Duration = Duration::from_secs(600);

/// Bounded retry window for optimistic-concurrency conflicts on the
/// debt-status annotation write.
const STATUS_WRITE_ATTEMPTS: u32 = 5;
const STATUS_WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Reconciles tenant namespaces against their debt-status annotation.
pub struct Reconciler {
    client: Client,
    cache: ResourceCache,
    lock: DistributedLock,
    metrics: Arc<dyn DebtMetrics>,
    certificate: Arc<dyn SuspensionStrategy>,
    network: Arc<dyn SuspensionStrategy>,
    rbac: Arc<dyn SuspensionStrategy>,
    legacy: LegacyFunctions,
    config: Arc<SuspensionConfig>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: Client,
        system_namespace: &str,
        holder: &str,
        config: Arc<SuspensionConfig>,
        metrics: Arc<dyn DebtMetrics>,
        object_storage: Option<Arc<dyn ObjectStorageClientTrait>>,
    ) -> Self {
        let cache = ResourceCache::new();
        let codec = BackupCodec::new(client.clone());

        let certificate: Arc<dyn SuspensionStrategy> = Arc::new(CertificateStrategy::new(
            client.clone(),
            cache.clone(),
            config.clone(),
        ));
        let network: Arc<dyn SuspensionStrategy> = Arc::new(NetworkStrategy::new(
            client.clone(),
            cache.clone(),
            codec.clone(),
            config.clone(),
        ));
        let rbac: Arc<dyn SuspensionStrategy> = Arc::new(RbacStrategy::new(
            client.clone(),
            cache.clone(),
            codec,
            config.clone(),
        ));

        Self::with_strategies(
            client,
            system_namespace,
            holder,
            config,
            metrics,
            object_storage,
            cache,
            certificate,
            network,
            rbac,
        )
    }

    /// Assemble a reconciler from pre-built collaborators. [`Reconciler::new`]
    /// is the production wiring; tests substitute scripted strategies here.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_strategies(
        client: Client,
        system_namespace: &str,
        holder: &str,
        config: Arc<SuspensionConfig>,
        metrics: Arc<dyn DebtMetrics>,
        object_storage: Option<Arc<dyn ObjectStorageClientTrait>>,
        cache: ResourceCache,
        certificate: Arc<dyn SuspensionStrategy>,
        network: Arc<dyn SuspensionStrategy>,
        rbac: Arc<dyn SuspensionStrategy>,
    ) -> Self {
        let lock = DistributedLock::new(client.clone(), system_namespace, holder);
        let legacy = LegacyFunctions::new(client.clone(), object_storage);

        Self {
            client,
            cache,
            lock,
            metrics,
            certificate,
            network,
            rbac,
            legacy,
            config,
        }
    }

    /// All strategies, for transaction rollback lookup by name.
    fn strategies(&self) -> Vec<Arc<dyn SuspensionStrategy>> {
        vec![
            self.certificate.clone(),
            self.network.clone(),
            self.rbac.clone(),
        ]
    }

    /// Reconcile one namespace event.
    ///
    /// Returns `Ok(Some(interval))` when the caller should requeue after a
    /// delay instead of waiting for the next event, `Ok(None)` when the pass
    /// is complete, and `Err` for failures the outer retry/backoff should
    /// handle.
    pub async fn reconcile_namespace(
        &self,
        ns: &Namespace,
    ) -> Result<Option<Duration>, ControllerError> {
        let Some(name) = ns.metadata.name.as_deref() else {
            return Ok(None);
        };
        if ns.metadata.deletion_timestamp.is_some() {
            debug!("Namespace {} is terminating, skipping", name);
            return Ok(None);
        }
        let Some(value) = ns
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DEBT_STATUS_ANNOTATION))
        else {
            return Ok(None);
        };
        let Some(status) = DebtStatus::parse(value) else {
            // Self-heal corrupt state rather than looping on it
            warn!(
                "Namespace {} has unknown debt-status {:?}, coercing to Normal",
                name, value
            );
            self.write_debt_status(name, DebtStatus::Normal).await?;
            return Ok(None);
        };
        if status == DebtStatus::Normal || status.is_terminal() {
            debug!("Namespace {} debt-status {} needs no action", name, status.as_str());
            return Ok(None);
        }

        info!("Reconciling namespace {} with debt-status {}", name, status.as_str());
        let started = std::time::Instant::now();
        let outcome = match status {
            DebtStatus::Suspend => {
                self.locked_suspend(name, DebtStatus::SuspendCompleted).await
            }
            DebtStatus::TerminateSuspend => {
                self.locked_suspend(name, DebtStatus::TerminateSuspendCompleted)
                    .await
            }
            DebtStatus::Resume => self.locked_resume(name).await,
            DebtStatus::FinalDeletion => return self.run_deletion(name, started).await,
            // Covered by the early returns above
            _ => Ok(()),
        };

        let operation = match status {
            DebtStatus::Resume => "resume",
            _ => "suspend",
        };
        self.metrics
            .observe_duration(name, operation, started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => Ok(None),
            Err(e) if e.is_lock_busy() => {
                // Another replica is working on this namespace; check back soon.
                debug!("{}", e);
                Ok(Some(Duration::from_secs(30)))
            }
            Err(e) => Err(e),
        }
    }

    async fn locked_suspend(
        &self,
        namespace: &str,
        completed: DebtStatus,
    ) -> Result<(), ControllerError> {
        self.lock
            .with_lock(namespace, "suspend", self.suspend_namespace(namespace))
            .await?;
        self.write_debt_status(namespace, completed).await?;
        info!("Namespace {} suspended", namespace);
        Ok(())
    }

    async fn locked_resume(&self, namespace: &str) -> Result<(), ControllerError> {
        self.lock
            .with_lock(namespace, "resume", self.resume_namespace(namespace))
            .await?;
        self.write_debt_status(namespace, DebtStatus::ResumeCompleted)
            .await?;
        self.cache.clear_namespace(namespace);
        info!("Namespace {} resumed", namespace);
        Ok(())
    }

    async fn run_deletion(
        &self,
        namespace: &str,
        started: std::time::Instant,
    ) -> Result<Option<Duration>, ControllerError> {
        let outcome = self.delete_namespace_resources(namespace).await;
        self.metrics
            .observe_duration(namespace, "deletion", started.elapsed().as_secs_f64());
        match outcome {
            Ok(()) => {
                self.write_debt_status(namespace, DebtStatus::FinalDeletionCompleted)
                    .await?;
                self.cache.clear_namespace(namespace);
                info!("Namespace {} resources deleted", namespace);
                Ok(None)
            }
            Err(e) => {
                // Teardown races slow external subsystems; retry later rather
                // than tripping the error backoff.
                warn!(
                    "Deletion for {} incomplete, requeueing in {:?}: {}",
                    namespace, DELETION_RETRY_INTERVAL, e
                );
                Ok(Some(DELETION_RETRY_INTERVAL))
            }
        }
    }

    /// Write the debt-status annotation, retrying on resource-version
    /// conflicts by re-fetching and re-applying.
    async fn write_debt_status(
        &self,
        namespace: &str,
        status: DebtStatus,
    ) -> Result<(), ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        for attempt in 1..=STATUS_WRITE_ATTEMPTS {
            let mut ns = api.get(namespace).await?;
            ns.metadata
                .annotations
                .get_or_insert_default()
                .insert(DEBT_STATUS_ANNOTATION.to_string(), status.as_str().to_string());

            match api.replace(namespace, &PostParams::default(), &ns).await {
                Ok(_) => {
                    debug!("Set {} debt-status to {}", namespace, status.as_str());
                    return Ok(());
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    debug!(
                        "Conflict writing debt-status for {} (attempt {}), retrying",
                        namespace, attempt
                    );
                    tokio::time::sleep(STATUS_WRITE_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControllerError::Reconciliation(format!(
            "gave up writing debt-status {} for {} after {} conflicts",
            status.as_str(),
            namespace,
            STATUS_WRITE_ATTEMPTS
        )))
    }
}
