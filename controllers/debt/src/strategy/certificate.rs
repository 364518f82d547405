//! Certificate/Challenge suspension strategy.
//!
//! Certificates are only annotated as suspended - deleting them (or their TLS
//! secret) would force a full ACME re-issuance on resume. In-flight Challenge
//! objects are deleted outright; they are safe to recreate.

use super::{SuspensionStrategy, CERTIFICATE_STRATEGY};
use crate::annotations::{SUSPENDED_ANNOTATION, SUSPENDED_TIME_ANNOTATION};
use crate::cache::ResourceCache;
use crate::config::SuspensionConfig;
use crate::error::ControllerError;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suspends cert-manager Certificates and Challenges.
pub struct CertificateStrategy {
    client: Client,
    cache: ResourceCache,
    config: Arc<SuspensionConfig>,
}

impl CertificateStrategy {
    /// Create the strategy.
    pub fn new(client: Client, cache: ResourceCache, config: Arc<SuspensionConfig>) -> Self {
        Self {
            client,
            cache,
            config,
        }
    }

    fn api(&self, namespace: &str, kind: &str) -> Option<Api<DynamicObject>> {
        self.config
            .api_resource(kind)
            .map(|ar| Api::namespaced_with(self.client.clone(), namespace, &ar))
    }

    async fn annotate_certificates(&self, namespace: &str) -> Result<(), ControllerError> {
        let Some(api) = self.api(namespace, "certificates") else {
            debug!("No certificate rule configured, skipping");
            return Ok(());
        };
        let certificates = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                // cert-manager not installed in this cluster
                debug!("Certificate API not available, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for cert in certificates.items {
            let Some(name) = cert.metadata.name.clone() else {
                continue;
            };
            let already = cert
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(SUSPENDED_ANNOTATION))
                .is_some_and(|v| v == "true");
            if already {
                debug!("Certificate {}/{} already suspended", namespace, name);
                continue;
            }

            let patch = serde_json::json!({
                "metadata": {
                    "annotations": {
                        SUSPENDED_ANNOTATION: "true",
                        SUSPENDED_TIME_ANNOTATION: chrono::Utc::now().to_rfc3339(),
                    }
                }
            });
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            info!("Suspended certificate {}/{}", namespace, name);
        }
        Ok(())
    }

    async fn delete_challenges(&self, namespace: &str) -> Result<(), ControllerError> {
        let Some(api) = self.api(namespace, "challenges") else {
            debug!("No challenge rule configured, skipping");
            return Ok(());
        };
        let challenges = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Challenge API not available, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for challenge in challenges.items {
            let Some(name) = challenge.metadata.name.clone() else {
                continue;
            };
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => info!("Deleted in-flight challenge {}/{}", namespace, name),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    debug!("Challenge {}/{} already gone", namespace, name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn clear_certificate_annotations(&self, namespace: &str) -> Result<(), ControllerError> {
        let Some(api) = self.api(namespace, "certificates") else {
            return Ok(());
        };
        let certificates = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for cert in certificates.items {
            let Some(name) = cert.metadata.name.clone() else {
                continue;
            };
            let suspended = cert
                .metadata
                .annotations
                .as_ref()
                .is_some_and(|a| a.contains_key(SUSPENDED_ANNOTATION));
            if !suspended {
                continue;
            }

            // JSON merge patch with null values removes the annotations
            let patch = serde_json::json!({
                "metadata": {
                    "annotations": {
                        SUSPENDED_ANNOTATION: null,
                        SUSPENDED_TIME_ANNOTATION: null,
                    }
                }
            });
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            info!("Resumed certificate {}/{}", namespace, name);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SuspensionStrategy for CertificateStrategy {
    fn name(&self) -> &'static str {
        CERTIFICATE_STRATEGY
    }

    fn is_supported(&self, resource_kind: &str) -> bool {
        matches!(resource_kind, "certificates" | "challenges")
    }

    async fn suspend(&self, namespace: &str) -> Result<(), ControllerError> {
        let (suspended, found) = self.cache.is_suspended(namespace, self.name())?;
        if found && suspended {
            debug!(
                "Certificate scope for {} already suspended (cache hit)",
                namespace
            );
            return Ok(());
        }

        self.annotate_certificates(namespace).await?;
        self.delete_challenges(namespace).await?;

        self.cache.set_suspended(namespace, self.name(), true)?;
        Ok(())
    }

    async fn resume(&self, namespace: &str) -> Result<(), ControllerError> {
        // The cache is advisory only on resume; annotations are the truth.
        if let Err(e) = self.clear_certificate_annotations(namespace).await {
            warn!("Certificate resume for {} failed: {}", namespace, e);
            return Err(e);
        }
        self.cache.set_suspended(namespace, self.name(), false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_client;

    #[tokio::test]
    async fn test_second_suspend_is_served_from_cache() {
        let (client, calls) = mock_client(vec![]);
        let strategy = CertificateStrategy::new(
            client,
            ResourceCache::new(),
            Arc::new(SuspensionConfig::default_table()),
        );

        strategy.suspend("ns-a").await.unwrap();
        let after_first = calls.lock().unwrap().len();
        assert!(after_first > 0, "first suspend must hit the API");

        // Second pass short-circuits on the cache: zero further mutations
        strategy.suspend("ns-a").await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), after_first);
    }
}
