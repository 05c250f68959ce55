//! Metrics implementation using Prometheus.

use devbox_core::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Helper to track HTTP request metrics (latency, count).
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}

/// Count one sandbox operation by name and outcome (`ok` or an error code).
pub fn track_sandbox_op(op: &str, outcome: &str) {
    metrics::counter!(
        "sandbox_operations_total",
        "op" => op.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_ops_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            track_sandbox_op("create", "ok");
            track_sandbox_op("create", "ok");
            track_sandbox_op("write_file", "PATH_INVALID");
        });

        let rendered = handle.render();
        assert!(rendered.contains("sandbox_operations_total"));
        assert!(rendered.contains("op=\"create\""));
        assert!(rendered.contains("outcome=\"PATH_INVALID\""));
    }

    #[test]
    fn test_request_metrics_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            track_request("GET", "/health", 200, 0.002);
        });

        let rendered = handle.render();
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("status=\"200\""));
    }
}
