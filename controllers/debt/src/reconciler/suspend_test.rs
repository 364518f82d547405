//! Phase-ordering and compensation tests with scripted strategies.

use super::Reconciler;
use crate::cache::ResourceCache;
use crate::config::SuspensionConfig;
use crate::metrics::testing::RecordingMetrics;
use crate::metrics::{DebtMetrics, NoopMetrics};
use crate::testing::{mock_client, ScriptedStrategy};
use std::sync::{Arc, Mutex};

fn scripted_reconciler(
    certificate: ScriptedStrategy,
    network: ScriptedStrategy,
    rbac: ScriptedStrategy,
    metrics: Arc<dyn DebtMetrics>,
) -> Reconciler {
    let (client, _calls) = mock_client(vec![]);
    Reconciler::with_strategies(
        client,
        "debt-system",
        "pod-a",
        Arc::new(SuspensionConfig::default_table()),
        metrics,
        None,
        ResourceCache::new(),
        Arc::new(certificate),
        Arc::new(network),
        Arc::new(rbac),
    )
}

#[tokio::test]
async fn test_suspend_runs_rbac_strictly_after_phase_one() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let reconciler = scripted_reconciler(
        ScriptedStrategy::new("certificate", &log),
        ScriptedStrategy::new("network", &log),
        ScriptedStrategy::new("rbac", &log),
        Arc::new(NoopMetrics),
    );

    reconciler.suspend_namespace("ns-a").await.unwrap();

    let calls = log.lock().unwrap().clone();
    assert!(calls.contains(&"certificate:suspend".to_string()));
    assert!(calls.contains(&"network:suspend".to_string()));
    assert_eq!(calls.last().map(String::as_str), Some("rbac:suspend"));
}

#[tokio::test]
async fn test_suspend_skips_rbac_and_compensates_when_phase_one_fails() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let metrics = Arc::new(RecordingMetrics::default());
    let reconciler = scripted_reconciler(
        ScriptedStrategy::new("certificate", &log),
        ScriptedStrategy::failing_suspend("network", &log),
        ScriptedStrategy::new("rbac", &log),
        metrics.clone(),
    );

    reconciler.suspend_namespace("ns-a").await.unwrap_err();

    let calls = log.lock().unwrap().clone();
    assert!(!calls.contains(&"rbac:suspend".to_string()));
    // The certificate step completed before the network error and is
    // compensated by rollback.
    assert!(calls.contains(&"certificate:resume".to_string()));

    let observed = metrics.operations.lock().unwrap().clone();
    assert!(observed.contains(&(
        "ns-a".to_string(),
        "suspend".to_string(),
        "failure".to_string(),
        "network".to_string()
    )));
}

#[tokio::test]
async fn test_resume_runs_rbac_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let reconciler = scripted_reconciler(
        ScriptedStrategy::new("certificate", &log),
        ScriptedStrategy::new("network", &log),
        ScriptedStrategy::new("rbac", &log),
        Arc::new(NoopMetrics),
    );

    reconciler.resume_namespace("ns-a").await.unwrap();

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls.first().map(String::as_str), Some("rbac:resume"));
    assert!(calls.contains(&"certificate:resume".to_string()));
    assert!(calls.contains(&"network:resume".to_string()));
}

#[tokio::test]
async fn test_resume_stops_before_phase_two_when_rbac_fails() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let reconciler = scripted_reconciler(
        ScriptedStrategy::new("certificate", &log),
        ScriptedStrategy::new("network", &log),
        ScriptedStrategy::failing_resume("rbac", &log),
        Arc::new(NoopMetrics),
    );

    reconciler.resume_namespace("ns-a").await.unwrap_err();

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls, vec!["rbac:resume".to_string()]);
}
