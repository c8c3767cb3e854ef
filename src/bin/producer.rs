//! Publish `MESSAGE_COUNT` text messages to a durable queue

use anyhow::Context as _;
use steward::config::ProducerConfig;
use steward::consumer::AmqpBroker;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ProducerConfig::from_env().context("Invalid producer configuration")?;

    let broker = AmqpBroker::connect(&config.amqp_url)
        .await
        .context("Failed to connect to RabbitMQ")?;
    broker
        .declare_queue(&config.queue_name)
        .await
        .context("Failed to declare a queue")?;
    broker
        .enable_publisher_confirms()
        .await
        .context("Failed to enable publisher confirms")?;

    for i in 1..=config.message_count {
        let body = format!("{} {}", config.message_prefix, i);
        broker
            .publish(&config.queue_name, body.as_bytes())
            .await
            .with_context(|| format!("Failed to publish message {}", i))?;
        debug!(body = %body, "Sent message");
    }

    info!(
        count = config.message_count,
        queue = %config.queue_name,
        "Sent messages"
    );
    broker.close().await;
    Ok(())
}
