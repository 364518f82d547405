//! Ordered-step compensation tracker for suspend/resume runs.
//!
//! A transaction is in-memory only: it is created at the start of a run,
//! collects one step per completed strategy operation, and is discarded after
//! rollback or success. Rollback is best-effort compensation, not ACID - it
//! walks the completed steps backward and invokes the inverse strategy
//! operation for each, logging (never propagating) compensation failures.

use crate::error::ControllerError;
use crate::strategy::SuspensionStrategy;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lifecycle state of a suspension transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Steps are still being applied
    InProgress,
    /// All steps applied
    Completed,
    /// A step failed; rollback was (or is being) attempted
    Failed,
}

/// The operation a completed step performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
    /// The strategy's suspend ran to completion
    Suspended,
    /// The strategy's resume ran to completion
    Resumed,
}

impl StepOp {
    fn as_str(&self) -> &'static str {
        match self {
            StepOp::Suspended => "suspended",
            StepOp::Resumed => "resumed",
        }
    }
}

/// In-memory record of one suspend or resume run.
#[derive(Debug, Clone)]
pub struct SuspensionTransaction {
    /// Tenant namespace the run operates on
    pub namespace: String,
    /// Current lifecycle state
    pub status: TransactionStatus,
    steps: Vec<String>,
    /// First error observed, if any
    pub error: Option<String>,
    /// When the run started
    pub created_at: DateTime<Utc>,
    /// Last mutation of this record
    pub updated_at: DateTime<Utc>,
}

impl SuspensionTransaction {
    /// Start a new transaction for a namespace.
    pub fn new(namespace: &str) -> Self {
        let now = Utc::now();
        Self {
            namespace: namespace.to_string(),
            status: TransactionStatus::InProgress,
            steps: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a completed step. Steps encode `{strategy}_{suspended|resumed}`
    /// and are the unit of compensation.
    pub fn record_step(&mut self, strategy: &str, op: StepOp) {
        self.steps.push(format!("{}_{}", strategy, op.as_str()));
        self.updated_at = Utc::now();
    }

    /// Mark the run successful.
    pub fn complete(&mut self) {
        self.status = TransactionStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Mark the run failed, capturing the triggering error.
    pub fn fail(&mut self, error: &ControllerError) {
        self.status = TransactionStatus::Failed;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    /// Completed steps in application order.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    fn parse_step(step: &str) -> Option<(&str, StepOp)> {
        let (strategy, op) = step.rsplit_once('_')?;
        match op {
            "suspended" => Some((strategy, StepOp::Suspended)),
            "resumed" => Some((strategy, StepOp::Resumed)),
            _ => None,
        }
    }
}

/// Walk a failed transaction's steps backward, invoking the inverse strategy
/// operation per step. Compensation failures are logged and skipped so a
/// rollback failure never masks the original error or blocks forward
/// progress.
pub async fn rollback(
    transaction: &SuspensionTransaction,
    strategies: &[Arc<dyn SuspensionStrategy>],
) {
    if transaction.steps.is_empty() {
        return;
    }
    info!(
        "Rolling back {} completed step(s) for namespace {}",
        transaction.steps.len(),
        transaction.namespace
    );

    for step in transaction.steps.iter().rev() {
        let Some((strategy_name, op)) = SuspensionTransaction::parse_step(step) else {
            warn!("Skipping unparseable transaction step {:?}", step);
            continue;
        };
        let Some(strategy) = strategies.iter().find(|s| s.name() == strategy_name) else {
            warn!("No strategy named {} for rollback step {:?}", strategy_name, step);
            continue;
        };

        let result = match op {
            StepOp::Suspended => strategy.resume(&transaction.namespace).await,
            StepOp::Resumed => strategy.suspend(&transaction.namespace).await,
        };
        match result {
            Ok(()) => info!(
                "Compensated step {} for namespace {}",
                step, transaction.namespace
            ),
            Err(e) => error!(
                "Best-effort rollback of step {} failed for namespace {}: {}",
                step, transaction.namespace, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStrategy;
    use std::sync::Mutex;

    fn scripted_strategies(
        log: &Arc<Mutex<Vec<String>>>,
        network_fails_resume: bool,
    ) -> Vec<Arc<dyn SuspensionStrategy>> {
        let network = if network_fails_resume {
            ScriptedStrategy::failing_resume("network", log)
        } else {
            ScriptedStrategy::new("network", log)
        };
        vec![
            Arc::new(ScriptedStrategy::new("certificate", log)),
            Arc::new(network),
            Arc::new(ScriptedStrategy::new("rbac", log)),
        ]
    }

    #[test]
    fn test_step_encoding_and_status() {
        let mut txn = SuspensionTransaction::new("ns-a");
        assert_eq!(txn.status, TransactionStatus::InProgress);

        txn.record_step("certificate", StepOp::Suspended);
        txn.record_step("network", StepOp::Suspended);
        assert_eq!(
            txn.steps(),
            &["certificate_suspended".to_string(), "network_suspended".to_string()]
        );

        txn.complete();
        assert_eq!(txn.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_fail_records_error() {
        let mut txn = SuspensionTransaction::new("ns-a");
        txn.fail(&ControllerError::Reconciliation("boom".to_string()));
        assert_eq!(txn.status, TransactionStatus::Failed);
        assert!(txn.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_rollback_walks_steps_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let strategies = scripted_strategies(&log, false);

        let mut txn = SuspensionTransaction::new("ns-a");
        txn.record_step("certificate", StepOp::Suspended);
        txn.record_step("network", StepOp::Suspended);
        txn.record_step("rbac", StepOp::Suspended);
        txn.fail(&ControllerError::Reconciliation("boom".to_string()));

        rollback(&txn, &strategies).await;

        let calls = log.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["rbac:resume", "network:resume", "certificate:resume"]
        );
    }

    #[tokio::test]
    async fn test_rollback_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let strategies = scripted_strategies(&log, true);

        let mut txn = SuspensionTransaction::new("ns-a");
        txn.record_step("certificate", StepOp::Suspended);
        txn.record_step("network", StepOp::Suspended);
        txn.fail(&ControllerError::Reconciliation("boom".to_string()));

        rollback(&txn, &strategies).await;

        // network:resume fails but certificate is still compensated
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["network:resume", "certificate:resume"]);
    }

    #[tokio::test]
    async fn test_rollback_inverts_resumed_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let strategies = scripted_strategies(&log, false);

        let mut txn = SuspensionTransaction::new("ns-a");
        txn.record_step("rbac", StepOp::Resumed);
        txn.fail(&ControllerError::Reconciliation("boom".to_string()));

        rollback(&txn, &strategies).await;

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["rbac:suspend"]);
    }
}
