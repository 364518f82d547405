//! TTL-based idempotency cache.
//!
//! Records whether a `(namespace, resource scope)` pair is currently believed
//! suspended so repeated reconciliation triggers can short-circuit without
//! touching the API server. The cache is a pure optimization: it is not
//! persisted, and a cold cache always falls back to the namespace annotation
//! or live resource state. A cache that cannot be read is a hard error: the
//! idempotency check must complete before any mutation runs.

use crate::error::ControllerError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Inactivity window after which the whole cache is evicted
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

struct CacheInner {
    /// namespace -> resource scope -> suspended
    entries: HashMap<String, HashMap<String, bool>>,
    last_cleanup: Instant,
}

fn poisoned<T>(e: PoisonError<T>) -> ControllerError {
    ControllerError::Cache(format!("suspension cache poisoned: {}", e))
}

/// In-memory suspension state cache, safe to share across tasks.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<RwLock<CacheInner>>,
    cleanup_interval: Duration,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    /// Create a cache with the default 10-minute eviction window
    pub fn new() -> Self {
        Self::with_cleanup_interval(CLEANUP_INTERVAL)
    }

    /// Create a cache with a custom eviction window (used by tests)
    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                entries: HashMap::new(),
                last_cleanup: Instant::now(),
            })),
            cleanup_interval,
        }
    }

    /// Look up the cached suspension state for a scope.
    ///
    /// Returns `(suspended, found)`; `found == false` means the caller must
    /// consult the authoritative source. Errors when the cache lock is
    /// poisoned; callers abort their operation rather than guess.
    pub fn is_suspended(
        &self,
        namespace: &str,
        scope: &str,
    ) -> Result<(bool, bool), ControllerError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(
            match inner.entries.get(namespace).and_then(|m| m.get(scope)) {
                Some(suspended) => (*suspended, true),
                None => (false, false),
            },
        )
    }

    /// Record the suspension state for a scope.
    pub fn set_suspended(
        &self,
        namespace: &str,
        scope: &str,
        suspended: bool,
    ) -> Result<(), ControllerError> {
        let due_for_cleanup = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            inner
                .entries
                .entry(namespace.to_string())
                .or_default()
                .insert(scope.to_string(), suspended);
            if inner.last_cleanup.elapsed() >= self.cleanup_interval {
                inner.last_cleanup = Instant::now();
                true
            } else {
                false
            }
        };

        if due_for_cleanup {
            // Coarse-grained eviction: the whole cache goes, off the hot path.
            let cache = self.clone();
            tokio::spawn(async move {
                cache.clear_all();
            });
        }
        Ok(())
    }

    /// Drop every cached scope for one namespace. Best effort: clearing only
    /// removes stale positives, so a failure here is logged, not raised.
    pub fn clear_namespace(&self, namespace: &str) {
        match self.inner.write() {
            Ok(mut inner) => {
                inner.entries.remove(namespace);
            }
            Err(e) => warn!("Could not clear cache for {}: {}", namespace, e),
        }
    }

    /// Drop everything. Best effort, like [`ResourceCache::clear_namespace`].
    pub fn clear_all(&self) {
        match self.inner.write() {
            Ok(mut inner) => {
                let evicted: usize = inner.entries.values().map(HashMap::len).sum();
                inner.entries.clear();
                debug!("Evicted {} cached suspension entries", evicted);
            }
            Err(e) => warn!("Could not clear cache: {}", e),
        }
    }

    /// Number of namespaces currently cached (test helper).
    #[cfg(test)]
    pub fn namespace_count(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = ResourceCache::new();
        assert_eq!(cache.is_suspended("ns-a", "network").unwrap(), (false, false));

        cache.set_suspended("ns-a", "network", true).unwrap();
        assert_eq!(cache.is_suspended("ns-a", "network").unwrap(), (true, true));

        cache.set_suspended("ns-a", "network", false).unwrap();
        assert_eq!(cache.is_suspended("ns-a", "network").unwrap(), (false, true));
    }

    #[tokio::test]
    async fn test_clear_namespace_only_affects_that_namespace() {
        let cache = ResourceCache::new();
        cache.set_suspended("ns-a", "network", true).unwrap();
        cache.set_suspended("ns-b", "rbac", true).unwrap();

        cache.clear_namespace("ns-a");

        assert_eq!(cache.is_suspended("ns-a", "network").unwrap(), (false, false));
        assert_eq!(cache.is_suspended("ns-b", "rbac").unwrap(), (true, true));
    }

    #[tokio::test]
    async fn test_full_eviction_after_inactivity_window() {
        let cache = ResourceCache::with_cleanup_interval(Duration::from_millis(0));
        cache.set_suspended("ns-a", "network", true).unwrap();
        // The write above is already past the zero-length window, so eviction
        // was scheduled; give the spawned task a moment to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.namespace_count(), 0);
    }

    #[test]
    fn test_poisoned_cache_is_a_hard_error() {
        let cache = ResourceCache::new();
        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(cache.is_suspended("ns-a", "network").is_err());
        assert!(cache.set_suspended("ns-a", "network", true).is_err());
    }
}
