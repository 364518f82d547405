//! Kubernetes namespace watcher.
//!
//! Watches Namespace objects for changes and triggers reconciliation using
//! kube_runtime::Controller, which handles automatic reconnection, retries,
//! and backoff.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches tenant namespaces for debt-status changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    namespace_api: Api<Namespace>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, namespace_api: Api<Namespace>) -> Self {
        Self {
            reconciler,
            namespace_api,
        }
    }

    /// Starts watching Namespace resources. Runs until the process exits.
    pub async fn watch_namespaces(&self) -> Result<(), ControllerError> {
        info!("Starting namespace watcher");

        let error_policy =
            |obj: Arc<Namespace>, error: &ControllerError, _ctx: Arc<Reconciler>| {
                error!(
                    "Reconciliation error for namespace {:?}: {}",
                    obj.metadata.name, error
                );
                Action::requeue(Duration::from_secs(60))
            };

        let reconcile = |obj: Arc<Namespace>, ctx: Arc<Reconciler>| async move {
            debug!("Reconciling namespace {:?}", obj.metadata.name);
            match ctx.reconcile_namespace(&obj).await? {
                Some(interval) => Ok(Action::requeue(interval)),
                None => Ok(Action::await_change()),
            }
        };

        // Debounce batches rapid annotation updates; concurrency bounds how
        // many namespaces reconcile at once.
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(3);

        Controller::new(self.namespace_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Namespace controller error: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
