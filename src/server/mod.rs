//! HTTP service lifecycle
//!
//! Provides probe endpoints for orchestrators:
//! - `/health` - Liveness probe (process is running)
//! - `/ready` - Readiness probe (process should receive traffic)
//!
//! Also provides the instrumented estimator endpoint, Prometheus metrics and
//! graceful shutdown handling for SIGTERM/SIGINT.

mod health;
mod instrument;
pub mod metrics;
mod pi;
pub mod runtime;
pub mod shutdown;

pub use health::{
    bind, build_router, metrics_router, spawn_server, warm_up, warm_up_until, AppState,
    ServiceState,
};
pub use metrics::{create_metrics, MessageOutcome, ServiceMetrics, SharedMetrics};
pub use runtime::{block_on_bounded, RUNTIME_SHUTDOWN_TIMEOUT};
pub use shutdown::{
    ignore_repeated_signals, shutdown_channel, ServerHandle, ShutdownController, ShutdownError,
    ShutdownPhase, ShutdownReport, ShutdownSequence, ShutdownSignal, ShutdownTimings,
    SignalListener, StopServer, TerminationSignal,
};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
