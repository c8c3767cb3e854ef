//! Drain up to `BATCH_SIZE` messages from a durable queue, then exit
//!
//! Exit code 0 after a completed session (including the no-message case),
//! non-zero when configuration or broker setup fails.

use anyhow::Context as _;
use steward::config::ConsumerConfig;
use steward::consumer::{AmqpBroker, BatchConsumer, SessionSettings, SimulatedWork};
use steward::server::{bind, create_metrics, metrics_router, spawn_server};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ConsumerConfig::from_env().context("Invalid consumer configuration")?;
    info!(
        queue = %config.queue_name,
        batch_size = config.batch_size,
        idle_timeout = ?config.idle_timeout,
        "Starting batch consumer"
    );

    let metrics = create_metrics().context("Failed to create metrics registry")?;
    let _metrics_server = match config.metrics_port {
        Some(port) => {
            let listener = bind(port)
                .await
                .with_context(|| format!("Failed to bind metrics port {}", port))?;
            Some(spawn_server(listener, metrics_router(metrics.clone())))
        }
        None => None,
    };

    let broker = AmqpBroker::connect(&config.amqp_url)
        .await
        .context("Failed to connect to RabbitMQ")?;
    broker
        .declare_queue(&config.queue_name)
        .await
        .context("Failed to declare a queue")?;

    let mut consumer = BatchConsumer::new(
        broker.queue(&config.queue_name),
        SimulatedWork::new(config.min_sleep, config.max_sleep),
        SessionSettings {
            batch_size: config.batch_size,
            idle_timeout: config.idle_timeout,
            grace_period: config.grace_period,
        },
    )
    .with_metrics(metrics);

    let outcome = consumer.run().await.context("Failed to start consuming")?;

    if outcome.terminates_process() {
        info!("No messages received, terminating");
        std::process::exit(0);
    }

    info!(
        processed = outcome.processed(),
        outcome = ?outcome,
        "Consumption session finished"
    );
    broker.close().await;
    Ok(())
}
