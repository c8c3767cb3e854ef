use anyhow::Context as _;
use steward::config::ServiceConfig;
use steward::server::{
    bind, block_on_bounded, build_router, create_metrics, ignore_repeated_signals, spawn_server,
    warm_up_until, ServiceState, ShutdownSequence, ShutdownTimings, SignalListener,
    RUNTIME_SHUTDOWN_TIMEOUT,
};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Estimates still running on the blocking pool must not keep the process alive
    block_on_bounded(run(), RUNTIME_SHUTDOWN_TIMEOUT).context("Failed to start tokio runtime")?
}

async fn run() -> anyhow::Result<()> {
    info!("Starting steward service");

    let config = ServiceConfig::from_env().context("Invalid service configuration")?;

    let metrics = create_metrics().context("Failed to create metrics registry")?;
    info!("Prometheus metrics registry initialized");

    // Alive from the start, ready only after warm-up
    let state = ServiceState::new();
    metrics.set_alive(true);
    metrics.set_ready(false);

    // Register before serving so a failure aborts startup
    let mut signals = SignalListener::register().context("Failed to register signal handlers")?;

    let listener = bind(config.port)
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    let server = spawn_server(listener, build_router(state.clone(), metrics.clone()));
    info!(port = config.port, "Server task spawned");

    let signal = warm_up_until(&state, &metrics, config.warmup, signals.recv()).await;
    let _repeated = ignore_repeated_signals(signals);

    let sequence = ShutdownSequence::new(
        state,
        metrics,
        ShutdownTimings {
            cleanup_delay: config.cleanup_delay,
            server_stop_timeout: config.shutdown_timeout,
        },
    );
    let report = sequence.run(signal, server).await;

    if let Err(e) = report.server_stop {
        warn!(error = %e, "HTTP server did not stop cleanly");
    }
    info!(signal = %report.signal, "steward service shut down");
    Ok(())
}
