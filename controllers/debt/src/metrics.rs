//! Observability port.
//!
//! Metrics are recorded through a constructor-injected trait rather than
//! process-wide singletons so tests can substitute a no-op or recording
//! implementation. The production implementation backs onto a prometheus
//! registry which is served over HTTP alongside a health probe.

use crate::error::ControllerError;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

/// Sink for per-operation observations keyed by
/// `(namespace, operation, result, strategy)`.
pub trait DebtMetrics: Send + Sync {
    /// Count one strategy or legacy-phase outcome
    fn observe_operation(&self, namespace: &str, operation: &str, result: &str, strategy: &str);

    /// Record how long a whole suspend/resume/delete run took
    fn observe_duration(&self, namespace: &str, operation: &str, seconds: f64);
}

/// Prometheus-backed implementation.
pub struct PrometheusMetrics {
    operations: IntCounterVec,
    durations: HistogramVec,
}

impl PrometheusMetrics {
    /// Build the counters/histograms and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, ControllerError> {
        let operations = IntCounterVec::new(
            Opts::new(
                "debt_operations_total",
                "Debt suspension operations by outcome",
            ),
            &["namespace", "operation", "result", "strategy"],
        )
        .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "debt_operation_duration_seconds",
                "Duration of debt suspension operations",
            ),
            &["namespace", "operation"],
        )
        .map_err(|e| ControllerError::Metrics(e.to_string()))?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(durations.clone()))
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;

        Ok(Self {
            operations,
            durations,
        })
    }
}

impl DebtMetrics for PrometheusMetrics {
    fn observe_operation(&self, namespace: &str, operation: &str, result: &str, strategy: &str) {
        self.operations
            .with_label_values(&[namespace, operation, result, strategy])
            .inc();
    }

    fn observe_duration(&self, namespace: &str, operation: &str, seconds: f64) {
        self.durations
            .with_label_values(&[namespace, operation])
            .observe(seconds);
    }
}

/// No-op sink for contexts where metrics are not wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl DebtMetrics for NoopMetrics {
    fn observe_operation(&self, _namespace: &str, _operation: &str, _result: &str, _strategy: &str) {
    }

    fn observe_duration(&self, _namespace: &str, _operation: &str, _seconds: f64) {}
}

/// Serve /metrics and /healthz until the process exits.
pub async fn serve_metrics(registry: Registry, addr: SocketAddr) -> Result<(), ControllerError> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(registry);

    info!("Serving metrics on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}

async fn render_metrics(State(registry): State<Registry>) -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Recording sink for unit tests.
#[cfg(test)]
pub mod testing {
    use super::DebtMetrics;
    use std::sync::Mutex;

    /// Captures every observation for later assertions.
    #[derive(Debug, Default)]
    pub struct RecordingMetrics {
        /// (namespace, operation, result, strategy) tuples, in order
        pub operations: Mutex<Vec<(String, String, String, String)>>,
    }

    impl DebtMetrics for RecordingMetrics {
        fn observe_operation(
            &self,
            namespace: &str,
            operation: &str,
            result: &str,
            strategy: &str,
        ) {
            self.operations.lock().unwrap().push((
                namespace.to_string(),
                operation.to_string(),
                result.to_string(),
                strategy.to_string(),
            ));
        }

        fn observe_duration(&self, _namespace: &str, _operation: &str, _seconds: f64) {}
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingMetrics;
    use super::*;

    #[test]
    fn test_prometheus_metrics_register_and_count() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();

        metrics.observe_operation("ns-a", "suspend", "success", "network");
        metrics.observe_duration("ns-a", "suspend", 1.5);

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"debt_operations_total"));
        assert!(names.contains(&"debt_operation_duration_seconds"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let _first = PrometheusMetrics::new(&registry).unwrap();
        assert!(PrometheusMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_recording_metrics_captures_tuples() {
        let metrics = RecordingMetrics::default();
        metrics.observe_operation("ns-a", "resume", "failure", "rbac");
        let calls = metrics.operations.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[(
                "ns-a".to_string(),
                "resume".to_string(),
                "failure".to_string(),
                "rbac".to_string()
            )]
        );
    }
}
