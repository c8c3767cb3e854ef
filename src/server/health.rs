//! Probe, estimator and metrics endpoints
//!
//! - `/health` - Liveness: Is the process alive?
//! - `/ready` - Readiness: Should the process receive new traffic?
//! - `/monte-carlo-pi` - Instrumented Pi estimator
//! - `/metrics` - Prometheus metrics in text format

use crate::server::instrument::track_metrics;
use crate::server::metrics::SharedMetrics;
use crate::server::pi::monte_carlo_pi;
use crate::server::shutdown::{shutdown_channel, ServerHandle};
use axum::{
    extract::{FromRef, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Process-wide liveness and readiness
///
/// Starts alive and not ready. Clones share the same flags. Only the
/// lifecycle code in this crate flips them; handlers just read.
#[derive(Debug, Clone)]
pub struct ServiceState {
    alive: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Causes the readiness probe to return 503
    pub(crate) fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Terminal: there is no way back to alive
    pub(crate) fn set_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined router state
#[derive(Clone)]
pub struct AppState {
    service: ServiceState,
    metrics: SharedMetrics,
}

impl AppState {
    pub fn new(service: ServiceState, metrics: SharedMetrics) -> Self {
        Self { service, metrics }
    }
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Liveness probe handler
async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.service.is_alive() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not healthy")
    }
}

/// Readiness probe handler
async fn ready(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.service.is_ready() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    }
}

/// Prometheus metrics handler
async fn metrics(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for probe, estimator and metrics endpoints
///
/// Only the estimator is instrumented; probe and scrape traffic would
/// otherwise dominate the request series.
pub fn build_router(service: ServiceState, metrics: SharedMetrics) -> Router {
    let instrumented = middleware::from_fn_with_state(metrics.clone(), track_metrics);
    let state = AppState::new(service, metrics);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/monte-carlo-pi", get(monte_carlo_pi).layer(instrumented))
        .route("/metrics", get(self::metrics))
        .with_state(state)
}

/// Router exposing only `/metrics`, for processes without probes
pub fn metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(self::metrics))
        .with_state(metrics)
}

/// Bind the listener on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener, std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await
}

/// Serve `router` on `listener` in a background task
///
/// The returned handle stops the server gracefully; see
/// [`ServerHandle`](crate::server::ServerHandle).
pub fn spawn_server(listener: TcpListener, router: Router) -> ServerHandle {
    let (controller, mut signal) = shutdown_channel();
    let local_addr = listener.local_addr().ok();

    let task = tokio::spawn(async move {
        // Log after successful bind - server is actually listening
        info!(addr = ?local_addr, "HTTP server listening");
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.wait().await })
            .await;
        if let Err(ref e) = result {
            error!(error = %e, "HTTP server failed");
        }
        result
    });

    ServerHandle::new(controller, task, local_addr)
}

/// Simulated startup work, then mark the service ready
pub async fn warm_up(service: &ServiceState, metrics: &SharedMetrics, delay: Duration) {
    info!(delay = ?delay, "Application starting up");
    tokio::time::sleep(delay).await;

    service.set_ready();
    metrics.set_ready(true);
    info!("Application startup complete, ready to serve traffic");
}

/// Warm up, unless `shutdown` resolves first; then wait for `shutdown`
///
/// A shutdown during warm-up returns without ever marking the service ready.
pub async fn warm_up_until<F: Future>(
    service: &ServiceState,
    metrics: &SharedMetrics,
    delay: Duration,
    shutdown: F,
) -> F::Output {
    tokio::pin!(shutdown);
    tokio::select! {
        biased;
        output = &mut shutdown => {
            warn!("Shutdown requested during warm-up");
            return output;
        }
        _ = warm_up(service, metrics, delay) => {}
    }
    shutdown.await
}
