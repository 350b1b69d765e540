//! Prometheus metrics for the gateway.
//!
//! Recording goes through the `metrics` facade, so every `Metrics::record_*`
//! call is a no-op until [`start_prometheus`] installs a recorder.

use std::{net::SocketAddr, time::Duration};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use tracing::info;

pub mod metrics_labels {
    pub const RESULT_SUCCESS: &str = "success";
    pub const RESULT_ERROR: &str = "error";

    pub const JOB_COMPLETED: &str = "completed";
    pub const JOB_FAILED: &str = "failed";
    pub const JOB_TIMED_OUT: &str = "timed_out";
    pub const JOB_CANCELLED: &str = "cancelled";
}

const REQUESTS_TOTAL: &str = "assistant_requests_total";
const REQUEST_DURATION: &str = "assistant_request_duration_seconds";
const REQUEST_ERRORS: &str = "assistant_request_errors_total";
const CAPABILITY_DENIED: &str = "assistant_capability_denied_total";
const UPSTREAM_ERRORS: &str = "assistant_upstream_errors_total";
const STREAM_EVENTS: &str = "assistant_stream_events_total";
const STREAM_ERRORS: &str = "assistant_stream_errors_total";
const POLL_ATTEMPTS: &str = "assistant_faceswap_poll_attempts_total";
const JOB_OUTCOMES: &str = "assistant_faceswap_jobs_total";

const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

pub struct Metrics;

impl Metrics {
    fn describe() {
        describe_counter!(REQUESTS_TOTAL, "Assistant requests by action");
        describe_histogram!(REQUEST_DURATION, "Assistant request duration by action");
        describe_counter!(REQUEST_ERRORS, "Failed assistant requests by action and category");
        describe_counter!(CAPABILITY_DENIED, "Requests refused by the capability gate");
        describe_counter!(UPSTREAM_ERRORS, "Upstream provider failures by kind");
        describe_counter!(STREAM_EVENTS, "Events relayed to streaming clients");
        describe_counter!(STREAM_ERRORS, "Streams aborted after the response started");
        describe_counter!(POLL_ATTEMPTS, "Face swap status fetches");
        describe_counter!(JOB_OUTCOMES, "Face swap jobs by terminal state");
    }

    pub fn record_request(action: &'static str) {
        counter!(REQUESTS_TOTAL, "action" => action).increment(1);
    }

    pub fn record_request_duration(action: &'static str, result: &'static str, duration: Duration) {
        histogram!(REQUEST_DURATION, "action" => action, "result" => result)
            .record(duration.as_secs_f64());
    }

    pub fn record_request_error(action: &'static str, category: &'static str) {
        counter!(REQUEST_ERRORS, "action" => action, "category" => category).increment(1);
    }

    pub fn record_capability_denied(action: &'static str) {
        counter!(CAPABILITY_DENIED, "action" => action).increment(1);
    }

    pub fn record_upstream_error(provider: &'static str, kind: &str) {
        counter!(UPSTREAM_ERRORS, "provider" => provider, "kind" => kind.to_string()).increment(1);
    }

    pub fn record_stream_event(kind: &'static str) {
        counter!(STREAM_EVENTS, "kind" => kind).increment(1);
    }

    pub fn record_stream_error(category: &'static str) {
        counter!(STREAM_ERRORS, "category" => category).increment(1);
    }

    pub fn record_poll_attempt() {
        counter!(POLL_ATTEMPTS).increment(1);
    }

    pub fn record_job_outcome(outcome: &'static str) {
        counter!(JOB_OUTCOMES, "outcome" => outcome).increment(1);
    }
}

/// Install the global recorder and serve `/metrics` on `port`.
///
/// Must run inside the tokio runtime; the exporter spawns its listener there.
pub fn start_prometheus(host: &str, port: u16) -> Result<(), BuildError> {
    let ip = host
        .parse()
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(ip, port);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)?
        .install()?;
    Metrics::describe();

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
