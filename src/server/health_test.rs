//! Tests for probe, estimator and metrics endpoints

use super::instrument::{track_metrics, CLIENT_CLOSED_REQUEST};
use super::*;
use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Start `router` on an ephemeral local port
async fn start(router: Router) -> (ServerHandle, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no address");
    (spawn_server(listener, router), addr)
}

async fn get_text(addr: SocketAddr, path: &str) -> (u16, String) {
    let response = reqwest::Client::new()
        .get(format!("http://{}{}", addr, path))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to server");
    let status = response.status().as_u16();
    let body = response.text().await.expect("Failed to read body");
    (status, body)
}

fn test_state() -> (ServiceState, SharedMetrics) {
    (
        ServiceState::new(),
        create_metrics().expect("Failed to create metrics"),
    )
}

#[test]
fn test_service_state_initial_values() {
    let state = ServiceState::new();

    assert!(state.is_alive(), "Should start alive");
    assert!(!state.is_ready(), "Should start not ready");
}

#[test]
fn test_service_state_flags_are_independent() {
    let state = ServiceState::new();
    let cloned = state.clone();

    state.set_ready();
    assert!(cloned.is_ready(), "Clone should share readiness");
    assert!(cloned.is_alive());

    state.set_not_ready();
    assert!(!cloned.is_ready());
    assert!(cloned.is_alive(), "Readiness must not affect liveness");

    state.set_dead();
    assert!(!cloned.is_alive());
    assert!(!cloned.is_ready());
}

#[tokio::test]
async fn test_probes_before_warm_up() {
    let (state, metrics) = test_state();
    let (_server, addr) = start(build_router(state, metrics)).await;

    assert_eq!(get_text(addr, "/health").await, (200, "OK".to_string()));
    assert_eq!(get_text(addr, "/ready").await, (503, "Not ready".to_string()));
}

#[tokio::test]
async fn test_probes_after_warm_up() {
    let (state, metrics) = test_state();
    let (_server, addr) = start(build_router(state.clone(), metrics.clone())).await;

    warm_up(&state, &metrics, Duration::from_millis(1)).await;

    assert_eq!(get_text(addr, "/health").await, (200, "OK".to_string()));
    assert_eq!(get_text(addr, "/ready").await, (200, "Ready".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_signal_during_warm_up_never_marks_ready() {
    let (state, metrics) = test_state();

    let signal = warm_up_until(&state, &metrics, Duration::from_secs(5), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        TerminationSignal::Terminate
    })
    .await;
    assert_eq!(signal, TerminationSignal::Terminate);
    assert!(!state.is_ready(), "Ready must not flip during an interrupted warm-up");

    // Past the original warm-up deadline nothing flips either
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!state.is_ready());
    assert!(metrics
        .encode()
        .unwrap()
        .contains("application_readiness_status 0"));
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_completes_before_waiting_for_signal() {
    let (state, metrics) = test_state();
    let observer = state.clone();

    let signal = warm_up_until(&state, &metrics, Duration::from_secs(5), async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        observer.is_ready()
    })
    .await;

    assert!(signal, "Service should be ready before the late signal");
    assert!(state.is_ready());
}

#[tokio::test]
async fn test_probes_during_drain_and_after_termination() {
    let (state, metrics) = test_state();
    let (_server, addr) = start(build_router(state.clone(), metrics)).await;
    state.set_ready();

    state.set_not_ready();
    assert_eq!(get_text(addr, "/health").await, (200, "OK".to_string()));
    assert_eq!(get_text(addr, "/ready").await, (503, "Not ready".to_string()));

    state.set_dead();
    assert_eq!(
        get_text(addr, "/health").await,
        (503, "Not healthy".to_string())
    );
}

#[tokio::test]
async fn test_monte_carlo_rejects_bad_iterations() {
    let (state, metrics) = test_state();
    let (_server, addr) = start(build_router(state, metrics.clone())).await;

    for path in [
        "/monte-carlo-pi",
        "/monte-carlo-pi?iterations=",
        "/monte-carlo-pi?iterations=abc",
        "/monte-carlo-pi?iterations=0",
        "/monte-carlo-pi?iterations=-5",
        "/monte-carlo-pi?iterations=9223372036854775807",
    ] {
        let (status, _) = get_text(addr, path).await;
        assert_eq!(status, 400, "{} should be rejected", path);
    }

    assert_eq!(metrics.http_request_count(400, "GET"), 6);
}

#[tokio::test]
async fn test_monte_carlo_returns_bounded_estimate() {
    let (state, metrics) = test_state();
    let (_server, addr) = start(build_router(state, metrics.clone())).await;

    let (status, body) = get_text(addr, "/monte-carlo-pi?iterations=5000").await;

    assert_eq!(status, 200);
    let value: f64 = body
        .strip_prefix("Estimated value of Pi: ")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| panic!("Unexpected body: {}", body));
    assert!((0.0..=4.0).contains(&value));

    assert_eq!(metrics.http_request_count(200, "GET"), 1);
    assert_eq!(metrics.http_duration_samples(200, "GET"), 1);
    let exposition = metrics.encode().unwrap();
    assert!(exposition.contains("monte_carlo_iterations_total 5000"));
}

#[tokio::test]
async fn test_probes_are_not_instrumented() {
    let (state, metrics) = test_state();
    let (_server, addr) = start(build_router(state, metrics.clone())).await;

    get_text(addr, "/health").await;
    get_text(addr, "/ready").await;

    assert_eq!(metrics.http_request_count(200, "GET"), 0);
    assert_eq!(metrics.http_request_count(503, "GET"), 0);
}

#[tokio::test]
async fn test_metrics_endpoint_renders_exposition() {
    let (state, metrics) = test_state();
    metrics.set_alive(true);
    let (_server, addr) = start(build_router(state, metrics)).await;

    let (status, body) = get_text(addr, "/metrics").await;

    assert_eq!(status, 200);
    assert!(body.contains("application_liveness_status 1"));
}

#[tokio::test]
async fn test_metrics_router_standalone() {
    let metrics = create_metrics().unwrap();
    let (_server, addr) = start(metrics_router(metrics)).await;

    let (status, body) = get_text(addr, "/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("# TYPE"));

    let (status, _) = get_text(addr, "/health").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_instrumentation_defaults_to_200_and_labels_method() {
    let metrics = create_metrics().unwrap();
    let router = Router::new()
        .route("/plain", get(|| async { "done" }).post(|| async { "posted" }))
        .layer(middleware::from_fn_with_state(metrics.clone(), track_metrics));
    let (_server, addr) = start(router).await;

    get_text(addr, "/plain").await;
    let response = reqwest::Client::new()
        .post(format!("http://{}/plain", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(metrics.http_request_count(200, "GET"), 1);
    assert_eq!(metrics.http_request_count(200, "POST"), 1);
}

#[tokio::test]
async fn test_instrumentation_records_panicking_handler() {
    let metrics = create_metrics().unwrap();
    let router = Router::new()
        .route(
            "/boom",
            get(|| async {
                if true {
                    panic!("handler exploded");
                }
                "unreachable"
            }),
        )
        .layer(middleware::from_fn_with_state(metrics.clone(), track_metrics));
    let (_server, addr) = start(router).await;

    let (status, _) = get_text(addr, "/boom").await;

    assert_eq!(status, 500);
    assert_eq!(metrics.http_request_count(500, "GET"), 1);
    assert_eq!(metrics.http_duration_samples(500, "GET"), 1);
}

#[tokio::test]
async fn test_server_handle_stops_gracefully() {
    let (state, metrics) = test_state();
    let (mut server, addr) = start(build_router(state, metrics)).await;
    assert_eq!(server.local_addr(), Some(addr));

    get_text(addr, "/health").await;

    let result = tokio::time::timeout(Duration::from_secs(5), server.stop()).await;
    assert!(matches!(result, Ok(Ok(()))), "Server should stop cleanly");

    let refused = reqwest::Client::new()
        .get(format!("http://{}/health", addr))
        .timeout(Duration::from_millis(500))
        .send()
        .await;
    assert!(refused.is_err(), "Stopped server should refuse connections");
}

#[tokio::test]
async fn test_instrumentation_records_abandoned_request() {
    let metrics = create_metrics().unwrap();
    let router = Router::new()
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        )
        .layer(middleware::from_fn_with_state(metrics.clone(), track_metrics));
    let (_server, addr) = start(router).await;

    let result = reqwest::Client::new()
        .get(format!("http://{}/slow", addr))
        .timeout(Duration::from_millis(200))
        .send()
        .await;
    assert!(result.is_err(), "Client should give up first");

    tokio::time::sleep(Duration::from_secs(3)).await;

    let recorded: u64 = [200, CLIENT_CLOSED_REQUEST, 500]
        .iter()
        .map(|code| metrics.http_request_count(*code, "GET"))
        .sum();
    assert_eq!(recorded, 1, "Exactly one observation per request");
    assert_eq!(metrics.http_request_count(CLIENT_CLOSED_REQUEST, "GET"), 1);
    assert_eq!(metrics.http_duration_samples(CLIENT_CLOSED_REQUEST, "GET"), 1);
}
