//! `/monte-carlo-pi` endpoint

use crate::estimator::estimate_pi_until;
use crate::server::metrics::SharedMetrics;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Largest accepted `iterations` value
pub const MAX_ITERATIONS: u64 = 100_000_000;

/// Sets the flag when the request future goes away
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Deserialize)]
pub struct PiParams {
    iterations: Option<String>,
}

/// Validate the raw `iterations` parameter
///
/// Returns the client-facing error message on rejection.
pub(crate) fn parse_iterations(raw: Option<&str>) -> Result<u64, &'static str> {
    let raw = match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => return Err("Please provide the number of iterations as a query parameter"),
    };

    let n: i64 = raw.parse().map_err(|_| "Invalid number of iterations")?;
    if n <= 0 {
        return Err("Number of iterations must be a positive integer");
    }
    let n = n as u64;
    if n > MAX_ITERATIONS {
        return Err("Number of iterations must not exceed 100000000");
    }
    Ok(n)
}

pub(crate) async fn monte_carlo_pi(
    State(metrics): State<SharedMetrics>,
    Query(params): Query<PiParams>,
) -> Response {
    let iterations = match parse_iterations(params.iterations.as_deref()) {
        Ok(n) => n,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    let start = Instant::now();
    let cancelled = Arc::new(AtomicBool::new(false));
    let _cancel = CancelOnDrop(cancelled.clone());
    // CPU-bound; keep it off the async workers.
    let estimate = tokio::task::spawn_blocking(move || {
        estimate_pi_until(&mut rand::thread_rng(), iterations, &cancelled)
    })
    .await;
    let pi = match estimate {
        Ok(Some(pi)) => pi,
        Ok(None) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Estimate cancelled".to_string())
                .into_response();
        }
        Err(e) => {
            error!(error = %e, iterations, "Monte Carlo task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to estimate Pi".to_string(),
            )
                .into_response();
        }
    };
    let duration = start.elapsed();

    metrics.record_monte_carlo(iterations, duration.as_secs_f64());
    debug!(iterations, pi, ?duration, "Estimated Pi");

    format!(
        "Estimated value of Pi: {:.6} (calculated in {:?})",
        pi, duration
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_iterations_accepts_positive() {
        assert_eq!(parse_iterations(Some("1")), Ok(1));
        assert_eq!(parse_iterations(Some(" 250 ")), Ok(250));
    }

    #[test]
    fn test_parse_iterations_caps_at_maximum() {
        assert_eq!(
            parse_iterations(Some(&MAX_ITERATIONS.to_string())),
            Ok(MAX_ITERATIONS)
        );
        for raw in ["100000001", "9223372036854775807", "99999999999999999999"] {
            assert!(
                parse_iterations(Some(raw)).is_err(),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_dropped_request_cancels_estimate() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(1)
            .build()
            .unwrap();

        runtime.block_on(async {
            let metrics = crate::server::create_metrics().unwrap();
            let request = monte_carlo_pi(
                State(metrics),
                Query(PiParams {
                    iterations: Some(MAX_ITERATIONS.to_string()),
                }),
            );

            // Abandon the request while the estimate runs
            let abandoned = tokio::time::timeout(Duration::from_millis(10), request).await;
            assert!(abandoned.is_err());

            // The only blocking thread frees up once the estimate gives up
            let next = tokio::time::timeout(
                Duration::from_secs(5),
                tokio::task::spawn_blocking(|| ()),
            )
            .await;
            assert!(next.is_ok(), "Abandoned estimate kept the blocking pool busy");
        });
    }

    #[test]
    fn test_parse_iterations_rejects_missing() {
        assert!(parse_iterations(None).is_err());
        assert!(parse_iterations(Some("")).is_err());
    }

    #[test]
    fn test_parse_iterations_rejects_non_positive_and_garbage() {
        for raw in ["0", "-1", "-9999", "abc", "1.5", "10e3"] {
            assert!(
                parse_iterations(Some(raw)).is_err(),
                "{:?} should be rejected",
                raw
            );
        }
    }
}
