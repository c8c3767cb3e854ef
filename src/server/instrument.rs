//! Request instrumentation middleware
//!
//! Wraps a handler, measures wall-clock latency and records one
//! `http_requests_total` increment plus one `http_request_duration_seconds`
//! observation labeled by `(code, method)`. A panicking handler is recorded
//! as a 500 and answered with a 500. A request whose future is dropped before
//! the handler finishes (client went away, server task aborted) is recorded
//! as a 499.

use crate::server::metrics::SharedMetrics;
use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error};

/// Status recorded for requests abandoned before a response existed
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Records the observation exactly once, when dropped
struct RequestObservation {
    metrics: SharedMetrics,
    method: Method,
    start: Instant,
    status: Option<u16>,
}

impl RequestObservation {
    fn start(metrics: SharedMetrics, method: Method) -> Self {
        Self {
            metrics,
            method,
            start: Instant::now(),
            status: None,
        }
    }

    fn finish(mut self, status: StatusCode) {
        self.status = Some(status.as_u16());
    }
}

impl Drop for RequestObservation {
    fn drop(&mut self) {
        let status = self.status.unwrap_or_else(|| {
            debug!(method = %self.method, "Request cancelled before the handler finished");
            CLIENT_CLOSED_REQUEST
        });
        self.metrics.record_http_request(
            status,
            self.method.as_str(),
            self.start.elapsed().as_secs_f64(),
        );
    }
}

pub async fn track_metrics(
    State(metrics): State<SharedMetrics>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let observation = RequestObservation::start(metrics, method.clone());

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(method = %method, panic = %message, "Handler panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    };

    observation.finish(response.status());
    response
}
