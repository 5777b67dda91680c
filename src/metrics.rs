use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics exporter and register metrics
pub fn init() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let builder = PrometheusBuilder::new();

    // Buckets: 10ms .. 5min, inference requests can stream for minutes
    let builder = builder.set_buckets_for_metric(
        Matcher::Full("proxy_request_duration_seconds".to_string()),
        &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
    )?;

    let handle = builder.install_recorder()?;

    describe_counter!(
        "proxy_requests_total",
        "Total number of requests forwarded to the backend, by status"
    );
    describe_histogram!(
        "proxy_request_duration_seconds",
        "Time until the backend returned response headers"
    );
    describe_counter!(
        "routing_decisions_total",
        "Rewriter outcomes (rewritten or pass-through reason), by assigned model"
    );
    describe_counter!(
        "model_refresh_total",
        "Model registry refreshes, by outcome"
    );
    describe_gauge!(
        "available_models",
        "Number of models currently reported as loaded"
    );
    describe_gauge!(
        "model_in_flight",
        "Requests currently in flight per model"
    );
    describe_counter!(
        "lease_releases_total",
        "Request lifecycle terminations, by the signal that fired first"
    );
    describe_counter!(
        "errors_total",
        "Total number of error responses, by type"
    );

    Ok(handle)
}

/// Record a request forwarded to the backend
pub fn record_request(status: u16, duration: Duration) {
    let labels = [("status", status.to_string())];

    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds").record(duration.as_secs_f64());
}

/// Record a rewriter outcome
pub fn record_routing_decision(model: Option<&str>, outcome: &str) {
    let labels = [
        ("model", model.unwrap_or("none").to_string()),
        ("outcome", outcome.to_string()),
    ];

    counter!("routing_decisions_total", &labels).increment(1);
}

/// Record a registry refresh and the resulting model count
pub fn record_refresh(success: bool, loaded: usize) {
    let labels = [("outcome", if success { "success" } else { "failure" }.to_string())];

    counter!("model_refresh_total", &labels).increment(1);
    gauge!("available_models").set(loaded as f64);
}

pub fn set_model_in_flight(model: &str, count: usize) {
    let labels = [("model", model.to_string())];

    gauge!("model_in_flight", &labels).set(count as f64);
}

pub fn record_lease_release(termination: &str) {
    let labels = [("termination", termination.to_string())];

    counter!("lease_releases_total", &labels).increment(1);
}

/// Record an error
pub fn record_error(error_type: &str) {
    let labels = [("type", error_type.to_string())];

    counter!("errors_total", &labels).increment(1);
}
