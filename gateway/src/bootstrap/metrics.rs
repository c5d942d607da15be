use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder behind the `metrics` macros used
/// by the filter chain. The handle renders the `/metrics` payload.
pub fn init_metrics() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    metrics::describe_counter!(
        "gateway_filter_halts_total",
        "Requests answered by a filter instead of the upstream"
    );
    metrics::describe_counter!(
        "gateway_filter_errors_total",
        "Filter invocations that returned an error"
    );
    metrics::describe_counter!(
        "gateway_chain_deadline_total",
        "Chain runs aborted by the request deadline"
    );
    metrics::describe_histogram!(
        "gateway_chain_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent running the filter chain"
    );

    Ok(handle)
}
