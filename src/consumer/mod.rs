//! Bounded batch consumption from a durable work queue
//!
//! Follows a trait-based pattern at the broker boundary:
//! - `QueueChannel` abstracts prefetch, delivery and acknowledgment
//! - `AmqpQueue` implements it over an AMQP 0-9-1 channel
//! - `MessageProcessor` is the unit of work, `SimulatedWork` sleeps for it
//!
//! A session announces a prefetch equal to its batch size, then waits on the
//! next delivery and the idle deadline at the same time. It stops at the batch
//! limit or when the idle window passes without a delivery.

pub mod amqp;
mod session;

pub use amqp::{AmqpBroker, AmqpQueue};
pub use session::{BatchConsumer, SessionOutcome, SessionSettings};

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Failed to open a channel: {0}")]
    Channel(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    DeclareQueue { queue: String, reason: String },

    #[error("Failed to set QoS: {0}")]
    Qos(String),

    #[error("Failed to register a consumer: {0}")]
    Consume(String),

    #[error("Consumer has not been registered")]
    NotConsuming,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Failed to acknowledge delivery {delivery_tag}: {reason}")]
    Ack { delivery_tag: u64, reason: String },

    #[error("Failed to publish message: {0}")]
    Publish(String),
}

/// A message handed to the consumer, not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

/// Broker channel bound to one queue
///
/// Owned by a single consumer; never shared.
#[async_trait]
pub trait QueueChannel: Send {
    /// Bound the number of unacknowledged deliveries in flight
    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError>;

    /// Register as a consumer with manual acknowledgment
    async fn start_consuming(&mut self) -> Result<(), BrokerError>;

    /// Next delivery, or None once the broker ends the stream
    ///
    /// Must be cancel-safe: dropping the future loses no delivery.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    /// Acknowledge a single delivery
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError>;
}

/// The unit of work performed for each delivery
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, delivery: &Delivery);
}

/// Sleeps for a random duration in `[min, max]` per message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedWork {
    min: Duration,
    max: Duration,
}

impl SimulatedWork {
    /// `max` below `min` is raised to `min`
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Pick the duration for one message
    pub fn pick(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl MessageProcessor for SimulatedWork {
    async fn process(&self, delivery: &Delivery) {
        let duration = self.pick();
        debug!(
            delivery_tag = delivery.delivery_tag,
            duration = ?duration,
            "Simulating work"
        );
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_tests;
