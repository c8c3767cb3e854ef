//! Prometheus metrics for the service and the batch consumer
//!
//! One registry holds every series; `/metrics` renders it in the text
//! exposition format. Handlers and the shutdown sequencer only call the
//! `record_*`/`set_*` methods.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use thiserror::Error;

/// Buckets for HTTP request latency (seconds)
const HTTP_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Buckets for Monte Carlo computation latency (seconds)
const MONTE_CARLO_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Buckets for per-message processing time (seconds)
const PROCESSING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 7.5, 10.0, 30.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Outcome label for a consumed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Acked,
    AckFailed,
}

impl MessageOutcome {
    fn as_label(self) -> &'static str {
        match self {
            MessageOutcome::Acked => "acked",
            MessageOutcome::AckFailed => "ack_failed",
        }
    }
}

pub struct ServiceMetrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    monte_carlo_latency_seconds: Histogram,
    monte_carlo_iterations_total: IntCounter,
    readiness_status: IntGauge,
    liveness_status: IntGauge,
    graceful_shutdowns_total: IntCounter,
    consumer_messages_total: IntCounterVec,
    consumer_processing_seconds: Histogram,
}

/// Metrics handle shared between handlers, middleware and the sequencer
pub type SharedMetrics = Arc<ServiceMetrics>;

/// Create the registry and register every series
pub fn create_metrics() -> Result<SharedMetrics, MetricsError> {
    ServiceMetrics::new().map(Arc::new)
}

impl ServiceMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Count of all HTTP requests"),
            &["code", "method"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of all HTTP requests",
            )
            .buckets(HTTP_DURATION_BUCKETS.to_vec()),
            &["code", "method"],
        )?;
        let monte_carlo_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "monte_carlo_latency_seconds",
                "Latency of Monte Carlo Pi calculations",
            )
            .buckets(MONTE_CARLO_BUCKETS.to_vec()),
        )?;
        let monte_carlo_iterations_total = IntCounter::new(
            "monte_carlo_iterations_total",
            "Total number of Monte Carlo iterations performed",
        )?;
        let readiness_status = IntGauge::new(
            "application_readiness_status",
            "Application readiness status (1 = ready, 0 = not ready)",
        )?;
        let liveness_status = IntGauge::new(
            "application_liveness_status",
            "Application liveness status (1 = alive, 0 = dead)",
        )?;
        let graceful_shutdowns_total = IntCounter::new(
            "application_graceful_shutdowns_total",
            "Total number of graceful shutdown attempts",
        )?;
        let consumer_messages_total = IntCounterVec::new(
            Opts::new(
                "consumer_messages_total",
                "Messages processed by the batch consumer",
            ),
            &["outcome"],
        )?;
        let consumer_processing_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consumer_message_processing_seconds",
                "Time spent processing a single message",
            )
            .buckets(PROCESSING_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(monte_carlo_latency_seconds.clone()))?;
        registry.register(Box::new(monte_carlo_iterations_total.clone()))?;
        registry.register(Box::new(readiness_status.clone()))?;
        registry.register(Box::new(liveness_status.clone()))?;
        registry.register(Box::new(graceful_shutdowns_total.clone()))?;
        registry.register(Box::new(consumer_messages_total.clone()))?;
        registry.register(Box::new(consumer_processing_seconds.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            monte_carlo_latency_seconds,
            monte_carlo_iterations_total,
            readiness_status,
            liveness_status,
            graceful_shutdowns_total,
            consumer_messages_total,
            consumer_processing_seconds,
        })
    }

    /// Record one handled HTTP request
    pub fn record_http_request(&self, code: u16, method: &str, duration_secs: f64) {
        let code = code.to_string();
        let labels = [code.as_str(), method];
        self.http_requests_total.with_label_values(&labels).inc();
        self.http_request_duration_seconds
            .with_label_values(&labels)
            .observe(duration_secs);
    }

    /// Number of requests recorded for a `(code, method)` pair
    pub fn http_request_count(&self, code: u16, method: &str) -> u64 {
        self.http_requests_total
            .with_label_values(&[&code.to_string(), method])
            .get()
    }

    /// Number of latency observations recorded for a `(code, method)` pair
    pub fn http_duration_samples(&self, code: u16, method: &str) -> u64 {
        self.http_request_duration_seconds
            .with_label_values(&[&code.to_string(), method])
            .get_sample_count()
    }

    pub fn record_monte_carlo(&self, iterations: u64, duration_secs: f64) {
        self.monte_carlo_iterations_total.inc_by(iterations);
        self.monte_carlo_latency_seconds.observe(duration_secs);
    }

    pub fn set_ready(&self, ready: bool) {
        self.readiness_status.set(i64::from(ready));
    }

    pub fn set_alive(&self, alive: bool) {
        self.liveness_status.set(i64::from(alive));
    }

    pub fn record_shutdown_attempt(&self) {
        self.graceful_shutdowns_total.inc();
    }

    pub fn shutdown_attempts(&self) -> u64 {
        self.graceful_shutdowns_total.get()
    }

    pub fn record_message(&self, outcome: MessageOutcome, duration_secs: f64) {
        self.consumer_messages_total
            .with_label_values(&[outcome.as_label()])
            .inc();
        self.consumer_processing_seconds.observe(duration_secs);
    }

    pub fn messages(&self, outcome: MessageOutcome) -> u64 {
        self.consumer_messages_total
            .with_label_values(&[outcome.as_label()])
            .get()
    }

    /// Render all series in the Prometheus text format
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_recorded_once_per_call() {
        let metrics = ServiceMetrics::new().unwrap();

        metrics.record_http_request(200, "GET", 0.01);
        metrics.record_http_request(200, "GET", 0.02);
        metrics.record_http_request(400, "GET", 0.001);

        assert_eq!(metrics.http_request_count(200, "GET"), 2);
        assert_eq!(metrics.http_request_count(400, "GET"), 1);
        assert_eq!(metrics.http_duration_samples(200, "GET"), 2);
        assert_eq!(metrics.http_request_count(500, "POST"), 0);
    }

    #[test]
    fn test_encode_contains_lifecycle_series() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.set_ready(true);
        metrics.set_alive(true);
        metrics.record_shutdown_attempt();

        let body = metrics.encode().unwrap();

        assert!(body.contains("application_readiness_status 1"));
        assert!(body.contains("application_liveness_status 1"));
        assert!(body.contains("application_graceful_shutdowns_total 1"));
    }

    #[test]
    fn test_monte_carlo_and_consumer_series() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_monte_carlo(1000, 0.002);
        metrics.record_message(MessageOutcome::Acked, 3.0);
        metrics.record_message(MessageOutcome::AckFailed, 4.0);

        let body = metrics.encode().unwrap();

        assert!(body.contains("monte_carlo_iterations_total 1000"));
        assert!(body.contains("monte_carlo_latency_seconds_count 1"));
        assert!(body.contains("consumer_message_processing_seconds_count 2"));
        assert_eq!(metrics.messages(MessageOutcome::Acked), 1);
        assert_eq!(metrics.messages(MessageOutcome::AckFailed), 1);
    }
}
