//! Suspension strategies.
//!
//! Each strategy is a self-contained unit of reversible mutation for one
//! class of resource kinds:
//! - `certificate`: Certificate annotation + Challenge deletion
//! - `network`: Ingress/Service/Gateway/VirtualService/DestinationRule
//! - `rbac`: RoleBinding substitution against a restricted read-only Role
//!
//! The set is closed and the phase ordering is a hard-coded correctness
//! requirement (RBAC restriction must never cut off the access the network
//! phase still needs), so there is no open-ended registration.

pub mod certificate;
pub mod network;
#[cfg(test)]
mod network_test;
pub mod rbac;
#[cfg(test)]
mod rbac_test;

use crate::error::ControllerError;

pub use certificate::CertificateStrategy;
pub use network::NetworkStrategy;
pub use rbac::RbacStrategy;

/// Strategy names used in transaction steps and metrics labels
pub const CERTIFICATE_STRATEGY: &str = "certificate";
/// Network strategy name
pub const NETWORK_STRATEGY: &str = "network";
/// RBAC strategy name
pub const RBAC_STRATEGY: &str = "rbac";

/// A reversible suspension unit for one class of resource kinds.
///
/// `suspend` must be idempotent: it consults the resource cache first and
/// returns immediately when its scope is already marked suspended. `resume`
/// unconditionally attempts restoration; the cache is advisory there, the
/// per-resource annotations are the source of truth.
#[async_trait::async_trait]
pub trait SuspensionStrategy: Send + Sync {
    /// Stable name used for dispatch, rollback lookup, and metrics labels
    fn name(&self) -> &'static str;

    /// Whether this strategy handles the given resource kind
    fn is_supported(&self, resource_kind: &str) -> bool;

    /// Suspend every supported resource in the namespace
    async fn suspend(&self, namespace: &str) -> Result<(), ControllerError>;

    /// Restore every supported resource in the namespace
    async fn resume(&self, namespace: &str) -> Result<(), ControllerError>;
}
