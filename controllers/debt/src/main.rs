//! Debt Controller
//!
//! Suspends, resumes, and deletes tenant namespace resources in response to
//! the billing-driven `debt-status` annotation:
//! - Suspend: back up and clear traffic-bearing configuration, restrict RBAC,
//!   stop databases, zero out quotas, disable storage credentials
//! - Resume: restore everything from the backups, in the inverse order
//! - FinalDeletion: tear down all tenant resources with foreground propagation

mod annotations;
mod backup;
mod cache;
mod config;
mod controller;
mod error;
mod legacy;
mod lock;
mod metrics;
mod reconciler;
mod strategy;
#[cfg(test)]
mod testing;
mod transaction;
mod watcher;

use crate::controller::{Controller, ObjectStorageSettings};
use crate::error::ControllerError;
use std::env;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Debt Controller");

    // Load configuration from environment variables
    let system_namespace =
        env::var("SYSTEM_NAMESPACE").unwrap_or_else(|_| "debt-system".to_string());
    let holder = env::var("POD_NAME").unwrap_or_else(|_| "debt-controller".to_string());
    let metrics_addr = env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR: {}", e)))?;

    // Object storage is optional; all three variables must be present.
    let storage_settings = match (
        env::var("OS_ADMIN_URL"),
        env::var("OS_ACCESS_KEY"),
        env::var("OS_SECRET_KEY"),
    ) {
        (Ok(url), Ok(access_key), Ok(secret_key)) => Some(ObjectStorageSettings {
            url,
            access_key,
            secret_key,
        }),
        _ => None,
    };

    info!("Configuration:");
    info!("  System namespace: {}", system_namespace);
    info!("  Metrics address: {}", metrics_addr);
    info!(
        "  Object storage: {}",
        storage_settings
            .as_ref()
            .map(|s| s.url.as_str())
            .unwrap_or("disabled")
    );

    // Initialize and run controller
    let controller =
        Controller::new(system_namespace, holder, metrics_addr, storage_settings).await?;
    controller.run().await?;

    Ok(())
}
