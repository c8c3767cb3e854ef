//! Probe-aware HTTP service with graceful shutdown, plus a bounded batch
//! consumer for durable work queues.
//!
//! - [`server`] - liveness/readiness state, HTTP endpoints, metrics, shutdown sequencing
//! - [`consumer`] - prefetch-limited, idle-timeout-aware queue draining
//! - [`config`] - validated configuration built from environment variables
//! - [`estimator`] - Monte Carlo estimation of Pi

pub mod config;
pub mod consumer;
pub mod estimator;
pub mod server;
