//! Resume orchestration.
//!
//! The phase order inverts the suspend run: RBAC restoration goes first so
//! the tenant's permissions are back before their traffic-bearing
//! configuration reappears; the certificate and network strategies and the
//! legacy routines then run concurrently with fail-fast cancellation.

use super::Reconciler;
use crate::error::ControllerError;
use crate::strategy::SuspensionStrategy;
use crate::transaction::{rollback, StepOp, SuspensionTransaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

impl Reconciler {
    /// Resume all resources in a namespace. On failure, steps that did
    /// complete are re-suspended (best effort) so the namespace is not left
    /// half-restored, and the original error is returned.
    pub(super) async fn resume_namespace(&self, namespace: &str) -> Result<(), ControllerError> {
        let transaction = Mutex::new(SuspensionTransaction::new(namespace));

        let outcome = self.run_resume_phases(namespace, &transaction).await;
        let mut transaction = transaction.into_inner();
        match outcome {
            Ok(()) => {
                transaction.complete();
                Ok(())
            }
            Err(e) => {
                error!("Resume of {} failed, rolling back: {}", namespace, e);
                transaction.fail(&e);
                rollback(&transaction, &self.strategies()).await;
                Err(e)
            }
        }
    }

    async fn run_resume_phases(
        &self,
        namespace: &str,
        transaction: &Mutex<SuspensionTransaction>,
    ) -> Result<(), ControllerError> {
        // Phase 1: RBAC restoration, alone.
        self.resume_step(namespace, transaction, &self.rbac).await?;

        // Phase 2: certificate and network strategies plus the legacy
        // routines, concurrently; the first error cancels the siblings.
        tokio::try_join!(
            self.resume_step(namespace, transaction, &self.certificate),
            self.resume_step(namespace, transaction, &self.network),
            self.legacy_phase(namespace, "resume", self.legacy.resume(namespace)),
        )?;

        info!("All resume phases completed for {}", namespace);
        Ok(())
    }

    async fn resume_step(
        &self,
        namespace: &str,
        transaction: &Mutex<SuspensionTransaction>,
        strategy: &Arc<dyn SuspensionStrategy>,
    ) -> Result<(), ControllerError> {
        let outcome = strategy.resume(namespace).await;
        let result = if outcome.is_ok() {
            transaction
                .lock()
                .await
                .record_step(strategy.name(), StepOp::Resumed);
            "success"
        } else {
            "failure"
        };
        self.metrics
            .observe_operation(namespace, "resume", result, strategy.name());
        outcome
    }
}
