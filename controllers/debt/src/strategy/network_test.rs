use super::network::{is_system_resource_name, kind_exceeds_failure_threshold};

#[test]
fn test_system_resource_names_are_skipped() {
    assert!(is_system_resource_name("kubernetes"));
    assert!(is_system_resource_name("kube-dns"));
    assert!(is_system_resource_name("kube-proxy"));

    assert!(!is_system_resource_name("web"));
    assert!(!is_system_resource_name("kube-dns-copy"));
    assert!(!is_system_resource_name(""));
}

#[test]
fn test_failure_threshold_at_half() {
    // No resources, no failures: fine either way
    assert!(!kind_exceeds_failure_threshold(0, 0));
    assert!(!kind_exceeds_failure_threshold(10, 0));

    // Under half tolerated
    assert!(!kind_exceeds_failure_threshold(10, 4));
    assert!(!kind_exceeds_failure_threshold(3, 1));

    // Exactly half fails the kind
    assert!(kind_exceeds_failure_threshold(10, 5));
    assert!(kind_exceeds_failure_threshold(2, 1));

    // Above half fails the kind
    assert!(kind_exceeds_failure_threshold(10, 9));
    assert!(kind_exceeds_failure_threshold(1, 1));
}
