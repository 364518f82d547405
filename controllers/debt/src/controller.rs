//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires together the
//! reconciler, the namespace watcher, and the metrics server, and runs them
//! until one exits.

use crate::config::SuspensionConfig;
use crate::error::ControllerError;
use crate::metrics::{serve_metrics, PrometheusMetrics};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use objectstorage_client::{ObjectStorageClient, ObjectStorageClientTrait};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Object-storage admin connection settings, from the environment.
pub struct ObjectStorageSettings {
    /// Admin endpoint base URL
    pub url: String,
    /// Admin access key
    pub access_key: String,
    /// Admin secret key
    pub secret_key: String,
}

/// Main controller for debt-driven namespace suspension.
pub struct Controller {
    namespace_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(
        system_namespace: String,
        holder: String,
        metrics_addr: SocketAddr,
        storage_settings: Option<ObjectStorageSettings>,
    ) -> Result<Self, ControllerError> {
        info!("Initializing debt controller");

        let kube_client = Client::try_default()
            .await
            .map_err(ControllerError::Kube)?;

        let object_storage: Option<Arc<dyn ObjectStorageClientTrait>> =
            match storage_settings {
                Some(settings) => {
                    let client = ObjectStorageClient::new(
                        settings.url.clone(),
                        settings.access_key,
                        settings.secret_key,
                    )?;
                    info!("Validating object-storage admin credentials...");
                    client.validate_credentials().await.map_err(|e| {
                        error!("Failed to validate object-storage credentials: {}", e);
                        error!("Please ensure:");
                        error!("  1. OS_ACCESS_KEY / OS_SECRET_KEY are set correctly");
                        error!("  2. The admin API is reachable at {}", settings.url);
                        ControllerError::ObjectStorage(e)
                    })?;
                    info!("Object-storage admin credentials validated");
                    Some(Arc::new(client))
                }
                None => {
                    info!("No object-storage settings; storage suspension disabled");
                    None
                }
            };

        let config = Arc::new(SuspensionConfig::load(kube_client.clone(), &system_namespace).await);
        info!("Loaded suspension configuration with {} resource rules", config.len());

        let registry = Registry::new();
        let metrics = Arc::new(PrometheusMetrics::new(&registry)?);
        let metrics_server = tokio::spawn(serve_metrics(registry, metrics_addr));

        let reconciler = Arc::new(Reconciler::new(
            kube_client.clone(),
            &system_namespace,
            &holder,
            config,
            metrics,
            object_storage,
        ));

        let namespace_api: Api<Namespace> = Api::all(kube_client);
        let watcher = Arc::new(Watcher::new(reconciler, namespace_api));

        let namespace_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_namespaces().await })
        };

        Ok(Self {
            namespace_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Debt controller running");

        // Both tasks run forever; either exiting is fatal.
        tokio::select! {
            result = &mut self.namespace_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Namespace watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Namespace watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Metrics(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
