//! Suspend orchestration.
//!
//! Phase 1 runs the certificate and network strategies and the legacy
//! per-resource routines concurrently with fail-fast cancellation; phase 2
//! runs the RBAC strategy strictly afterwards, because restricting RBAC first
//! could cut off access the network phase still needs. Each branch records
//! its own completed step in the shared transaction, so strategies that
//! finished before a sibling's error still get compensated by rollback.

use super::Reconciler;
use crate::error::ControllerError;
use crate::strategy::SuspensionStrategy;
use crate::transaction::{rollback, StepOp, SuspensionTransaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

impl Reconciler {
    /// Suspend all resources in a namespace. On failure, completed steps are
    /// rolled back (best effort) and the original error is returned.
    pub(super) async fn suspend_namespace(&self, namespace: &str) -> Result<(), ControllerError> {
        let transaction = Mutex::new(SuspensionTransaction::new(namespace));

        let outcome = self.run_suspend_phases(namespace, &transaction).await;
        let mut transaction = transaction.into_inner();
        match outcome {
            Ok(()) => {
                transaction.complete();
                Ok(())
            }
            Err(e) => {
                error!("Suspend of {} failed, rolling back: {}", namespace, e);
                transaction.fail(&e);
                rollback(&transaction, &self.strategies()).await;
                Err(e)
            }
        }
    }

    async fn run_suspend_phases(
        &self,
        namespace: &str,
        transaction: &Mutex<SuspensionTransaction>,
    ) -> Result<(), ControllerError> {
        // Phase 1: certificate and network strategies plus the legacy
        // routines, concurrently; the first error cancels the siblings.
        tokio::try_join!(
            self.suspend_step(namespace, transaction, &self.certificate),
            self.suspend_step(namespace, transaction, &self.network),
            self.legacy_phase(namespace, "suspend", self.legacy.suspend(namespace)),
        )?;

        // Phase 2: RBAC, strictly after phase 1.
        self.suspend_step(namespace, transaction, &self.rbac)
            .await?;

        info!("All suspend phases completed for {}", namespace);
        Ok(())
    }

    async fn suspend_step(
        &self,
        namespace: &str,
        transaction: &Mutex<SuspensionTransaction>,
        strategy: &Arc<dyn SuspensionStrategy>,
    ) -> Result<(), ControllerError> {
        let outcome = strategy.suspend(namespace).await;
        let result = if outcome.is_ok() {
            transaction
                .lock()
                .await
                .record_step(strategy.name(), StepOp::Suspended);
            "success"
        } else {
            "failure"
        };
        self.metrics
            .observe_operation(namespace, "suspend", result, strategy.name());
        outcome
    }

    /// Runs the legacy routines and counts their outcome. The legacy phase
    /// is not part of the rollback transaction; its routines are idempotent
    /// and self-inverting on the next resume.
    pub(super) async fn legacy_phase(
        &self,
        namespace: &str,
        operation: &'static str,
        fut: impl std::future::Future<Output = Result<(), ControllerError>>,
    ) -> Result<(), ControllerError> {
        let outcome = fut.await;
        self.metrics.observe_operation(
            namespace,
            operation,
            if outcome.is_ok() { "success" } else { "failure" },
            "legacy",
        );
        outcome
    }
}
