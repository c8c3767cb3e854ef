//! Graceful shutdown sequencing
//!
//! On SIGTERM/SIGINT the service walks a fixed, one-way sequence:
//! - `SignalReceived`: count the attempt
//! - `Draining`: mark not ready, then run the cleanup delay
//! - `ServerShutdown`: stop the HTTP server, bounded by a deadline
//! - `Terminated`: mark not alive, whatever the stop outcome was

use crate::server::health::ServiceState;
use crate::server::metrics::SharedMetrics;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Failed to register {signal} handler: {source}")]
    SignalRegistration {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Server did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("Server stopped with error: {0}")]
    Server(String),

    #[error("Server task failed: {0}")]
    Task(String),
}

/// Shutdown signal receiver
///
/// Cloned and handed to anything that must stop when shutdown is triggered.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Sender dropped, treat as shutdown
                break;
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    #[cfg(test)]
    pub(crate) fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for triggering shutdown
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
        info!("Shutdown signal sent");
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Termination signals that start the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// OS signal subscriptions, registered once at startup
///
/// Registering up front turns a handler failure into a startup error
/// instead of a panic mid-flight.
#[cfg(unix)]
pub struct SignalListener {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    pub fn register() -> Result<Self, ShutdownError> {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm =
            signal(SignalKind::terminate()).map_err(|source| ShutdownError::SignalRegistration {
                signal: "SIGTERM",
                source,
            })?;
        let sigint =
            signal(SignalKind::interrupt()).map_err(|source| ShutdownError::SignalRegistration {
                signal: "SIGINT",
                source,
            })?;

        Ok(Self { sigterm, sigint })
    }

    /// Block until SIGTERM or SIGINT arrives
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.sigterm.recv() => TerminationSignal::Terminate,
            _ = self.sigint.recv() => TerminationSignal::Interrupt,
        }
    }
}

/// Ctrl+C only (Windows)
#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn register() -> Result<Self, ShutdownError> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> TerminationSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl+C");
            std::future::pending::<()>().await;
        }
        TerminationSignal::Interrupt
    }
}

/// Log and drop any signal that arrives after the sequence has started
///
/// A repeated signal neither restarts nor shortens the sequence.
pub fn ignore_repeated_signals(mut listener: SignalListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = listener.recv().await;
            warn!(
                signal = %signal,
                "Shutdown already in progress, ignoring repeated signal"
            );
        }
    })
}

/// Something that can be asked to stop serving
#[async_trait]
pub trait StopServer: Send {
    /// Stop accepting connections and wait for in-flight requests
    async fn stop(&mut self) -> Result<(), ShutdownError>;

    /// Give up on a stop that missed its deadline
    fn abort(&mut self) {}
}

/// Handle to an HTTP server running in a background task
pub struct ServerHandle {
    controller: ShutdownController,
    task: JoinHandle<Result<(), std::io::Error>>,
    local_addr: Option<SocketAddr>,
}

impl ServerHandle {
    pub(crate) fn new(
        controller: ShutdownController,
        task: JoinHandle<Result<(), std::io::Error>>,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            controller,
            task,
            local_addr,
        }
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl StopServer for ServerHandle {
    async fn stop(&mut self) -> Result<(), ShutdownError> {
        self.controller.shutdown();
        match (&mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownError::Server(e.to_string())),
            Err(e) => Err(ShutdownError::Task(e.to_string())),
        }
    }

    fn abort(&mut self) {
        self.task.abort();
    }
}

/// Where the sequence currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    SignalReceived,
    Draining,
    ServerShutdown,
    Terminated,
}

/// Named delays of the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimings {
    /// Application teardown between "not ready" and the server stop
    pub cleanup_delay: Duration,
    /// Upper bound on the server stop
    pub server_stop_timeout: Duration,
}

/// What the sequence did
#[derive(Debug)]
pub struct ShutdownReport {
    pub signal: TerminationSignal,
    /// Err when the server failed to stop cleanly within the deadline
    pub server_stop: Result<(), ShutdownError>,
}

/// Ordered drain-and-stop procedure, run at most once
pub struct ShutdownSequence {
    service: ServiceState,
    metrics: SharedMetrics,
    timings: ShutdownTimings,
    phase: watch::Sender<ShutdownPhase>,
}

impl ShutdownSequence {
    pub fn new(service: ServiceState, metrics: SharedMetrics, timings: ShutdownTimings) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            service,
            metrics,
            timings,
            phase,
        }
    }

    /// Follow phase transitions
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    fn enter(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
    }

    /// Run the whole sequence; consumes `self` so it cannot run twice
    ///
    /// Never fails: a server that does not stop in time is reported in
    /// the returned [`ShutdownReport`] and liveness is cleared anyway.
    pub async fn run<S: StopServer>(self, signal: TerminationSignal, mut server: S) -> ShutdownReport {
        self.enter(ShutdownPhase::SignalReceived);
        info!(signal = %signal, "Received shutdown signal");
        self.metrics.record_shutdown_attempt();

        info!("Starting graceful shutdown");
        self.service.set_not_ready();
        self.metrics.set_ready(false);
        self.enter(ShutdownPhase::Draining);
        info!("Application marked as not ready, stopped accepting new traffic");

        info!(
            delay = ?self.timings.cleanup_delay,
            "Performing application cleanup operations"
        );
        tokio::time::sleep(self.timings.cleanup_delay).await;
        info!("Application cleanup operations completed");

        self.enter(ShutdownPhase::ServerShutdown);
        let deadline = self.timings.server_stop_timeout;
        info!(timeout = ?deadline, "Shutting down HTTP server");

        let outcome = tokio::time::timeout(deadline, server.stop()).await;
        let server_stop = match outcome {
            Ok(Ok(())) => {
                info!("Server shutdown completed successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Server shutdown error");
                Err(e)
            }
            Err(_) => {
                server.abort();
                let e = ShutdownError::StopTimeout(deadline);
                warn!(error = %e, "Server shutdown error");
                Err(e)
            }
        };

        self.service.set_dead();
        self.metrics.set_alive(false);
        self.enter(ShutdownPhase::Terminated);
        info!("Application shutdown complete");

        ShutdownReport {
            signal,
            server_stop,
        }
    }
}
