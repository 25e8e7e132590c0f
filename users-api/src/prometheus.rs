// prometheus exporter setup

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub fn setup_metrics_recorder() -> Option<PrometheusHandle> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    const PAYLOAD_SIZES: &[f64] = &[
        1024.0,     // 1KB
        10240.0,    // 10KB
        102400.0,   // 100KB
        1048576.0,  // 1MB
        10485760.0, // 10MB
    ];

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .expect("duration bucket list is non-empty")
        .set_buckets_for_metric(Matcher::Suffix("_size_bytes".to_string()), PAYLOAD_SIZES)
        .expect("payload bucket list is non-empty");

    // Recorder installation is best-effort: a failure (e.g. a recorder
    // already registered in this process) loses the /metrics endpoint but
    // must never keep the service from serving.
    match builder.install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::error!("failed to install Prometheus recorder: {}", err);
            None
        }
    }
}
