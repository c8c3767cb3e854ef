//! AMQP 0-9-1 broker client
//!
//! Durable queue, manual acknowledgment, no exclusive/no-wait flags. Any
//! broker speaking AMQP 0-9-1 with `basic.qos` works.

use super::{BrokerError, Delivery, QueueChannel};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{info, warn};
use uuid::Uuid;

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Connection plus one channel
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect and open a channel; both failures are fatal to the caller
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        info!("Connected to broker");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declare a durable, non-exclusive, non-auto-delete queue
    pub async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::DeclareQueue {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        info!(queue, "Queue declared");
        Ok(())
    }

    /// Consumer side of `queue`, sharing this broker's channel
    pub fn queue(&self, queue: &str) -> AmqpQueue {
        AmqpQueue {
            channel: self.channel.clone(),
            queue: queue.to_string(),
            consumer_tag: format!("batch-consumer-{}", Uuid::new_v4()),
            consumer: None,
        }
    }

    /// Have the broker confirm every publish
    pub async fn enable_publisher_confirms(&self) -> Result<(), BrokerError> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))
    }

    /// Publish a text message to `queue` through the default exchange
    pub async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_content_type("text/plain".into()),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        if confirmation.is_nack() {
            return Err(BrokerError::Publish("broker rejected the message".to_string()));
        }
        Ok(())
    }

    /// Close channel and connection; errors are only logged
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %e, "Failed to close channel");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %e, "Failed to close connection");
        }
    }
}

/// [`QueueChannel`] over an AMQP channel
pub struct AmqpQueue {
    channel: Channel,
    queue: String,
    consumer_tag: String,
    consumer: Option<Consumer>,
}

#[async_trait]
impl QueueChannel for AmqpQueue {
    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Qos(e.to_string()))
    }

    async fn start_consuming(&mut self) -> Result<(), BrokerError> {
        // no_ack=false: deliveries stay unacknowledged until `ack`
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Consumer registered");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let Some(consumer) = self.consumer.as_mut() else {
            return Some(Err(BrokerError::NotConsuming));
        };

        consumer.next().await.map(|result| {
            result
                .map(|delivery| Delivery {
                    delivery_tag: delivery.delivery_tag,
                    body: delivery.data,
                })
                .map_err(|e| BrokerError::Delivery(e.to_string()))
        })
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                delivery_tag,
                reason: e.to_string(),
            })
    }
}
