//! Prometheus metrics exposition
//!
//! The library crates emit through the `metrics` facade:
//!
//! - `nsp_token_refresh_total` (counter): label `outcome`
//! - `nsp_subscription_renewal_total` (counter): label `outcome`
//! - `nsp_stream_records_total` (counter): label `outcome`
//! - `nsp_stream_consuming` (gauge): 1 while the consume loop runs
//!
//! This module installs the recorder and adds the shutdown step counter.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The handle's `render()` method produces the Prometheus text exposition format
/// suitable for serving on a `/metrics` endpoint.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();
    handle
}

fn describe_metrics() {
    metrics::describe_counter!(
        "nsp_token_refresh_total",
        "Scheduled bearer token refreshes by outcome"
    );
    metrics::describe_counter!(
        "nsp_subscription_renewal_total",
        "Scheduled subscription renewals by outcome"
    );
    metrics::describe_counter!(
        "nsp_stream_records_total",
        "Records taken from the topic by outcome"
    );
    metrics::describe_gauge!(
        "nsp_stream_consuming",
        "1 while the stream consumer is in its receive loop"
    );
    metrics::describe_counter!(
        "nsp_shutdown_steps_total",
        "Shutdown cleanup steps by step and outcome"
    );
}

/// Record the outcome of one ordered shutdown step.
pub fn record_shutdown_step(step: &'static str, ok: bool) {
    let outcome = if ok { "success" } else { "failure" };
    metrics::counter!("nsp_shutdown_steps_total", "step" => step, "outcome" => outcome)
        .increment(1);
}
