use super::rbac::{is_system_binding, restricted_policy_rules, RbacStrategy, RESTRICTED_ROLE_NAME};
use super::SuspensionStrategy;
use crate::backup::BackupCodec;
use crate::cache::ResourceCache;
use crate::config::SuspensionConfig;
use crate::testing::{mock_client, CannedResponse};
use std::sync::Arc;

const TENANT_BINDING: &str = r#"{"metadata":{"name":"tenant-edit","namespace":"ns-a"},"roleRef":{"apiGroup":"rbac.authorization.k8s.io","kind":"Role","name":"edit"},"subjects":[{"kind":"User","name":"alice"}]}"#;

#[test]
fn test_system_bindings_are_never_swapped() {
    assert!(is_system_binding("system:controller", "edit"));
    assert!(is_system_binding("cluster-autoscaler", "edit"));
    assert!(is_system_binding("kubeadm:bootstrap", "edit"));
    assert!(is_system_binding("tenantcloud-system-metering", "edit"));

    // Tenant binding name but privileged roleRef
    assert!(is_system_binding("tenant-ops", "cluster-admin"));
    assert!(is_system_binding("tenant-ops", "system:aggregate-to-edit"));
    assert!(is_system_binding("tenant-ops", "namespace-admin"));
}

#[test]
fn test_tenant_bindings_are_swapped() {
    assert!(!is_system_binding("tenant-dev", "edit"));
    assert!(!is_system_binding("app-deployer", "deployer-role"));
    // Prefix must anchor at the start
    assert!(!is_system_binding("my-system:thing", "edit"));
}

#[test]
fn test_restricted_role_is_read_only() {
    let rules = restricted_policy_rules();
    assert!(!rules.is_empty());
    for rule in &rules {
        for verb in &rule.verbs {
            assert!(
                matches!(verb.as_str(), "get" | "list" | "watch"),
                "unexpected verb {} in restricted role",
                verb
            );
        }
    }
}

#[test]
fn test_restricted_role_name_is_dns_safe() {
    assert!(RESTRICTED_ROLE_NAME.len() <= 63);
    assert!(
        RESTRICTED_ROLE_NAME
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '-')
    );
}

#[tokio::test]
async fn test_swap_backs_up_live_binding_before_delete() {
    let list_body: &'static str = r#"{"apiVersion":"rbac.authorization.k8s.io/v1","kind":"RoleBindingList","metadata":{},"items":[{"metadata":{"name":"tenant-edit","namespace":"ns-a"},"roleRef":{"apiGroup":"rbac.authorization.k8s.io","kind":"Role","name":"edit"},"subjects":[{"kind":"User","name":"alice"}]}]}"#;
    let (client, calls) = mock_client(vec![
        CannedResponse {
            method: "GET",
            path_fragment: "rolebindings",
            status: 200,
            body: list_body,
        },
        CannedResponse {
            method: "PATCH",
            path_fragment: "rolebindings/tenant-edit",
            status: 200,
            body: TENANT_BINDING,
        },
        CannedResponse {
            method: "POST",
            path_fragment: "rolebindings",
            status: 201,
            body: TENANT_BINDING,
        },
    ]);
    let strategy = RbacStrategy::new(
        client.clone(),
        ResourceCache::new(),
        BackupCodec::new(client),
        Arc::new(SuspensionConfig::default_table()),
    );

    strategy.suspend("ns-a").await.unwrap();

    let calls = calls.lock().unwrap();
    let position = |method: &str| {
        calls
            .iter()
            .position(|(m, p)| m == method && p.contains("rolebindings/tenant-edit"))
    };
    let patched = position("PATCH").expect("annotation patch on the live binding");
    let deleted = position("DELETE").expect("delete of the original binding");
    let recreated = calls
        .iter()
        .position(|(m, p)| m == "POST" && p.ends_with("/rolebindings"))
        .expect("recreate of the swapped binding");
    assert!(patched < deleted, "backup must land before the delete");
    assert!(deleted < recreated);
}
