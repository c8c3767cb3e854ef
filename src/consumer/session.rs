//! One bounded consumption session

use super::{BrokerError, Delivery, MessageProcessor, QueueChannel};
use crate::server::metrics::{MessageOutcome, SharedMetrics};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Bounds of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Stop after this many messages; also the prefetch count
    pub batch_size: u16,
    /// Give up after this long without a delivery
    pub idle_timeout: Duration,
    /// Extra wait before ending a session that saw no message at all
    pub grace_period: Duration,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The batch limit was reached
    BatchComplete { processed: u32 },
    /// The idle window passed after at least one message
    IdleTimeout { processed: u32 },
    /// Nothing arrived in the first idle window; the grace period has
    /// already elapsed and the process should terminate
    NoMessages,
    /// The broker ended the delivery stream
    StreamClosed { processed: u32 },
}

impl SessionOutcome {
    pub fn processed(&self) -> u32 {
        match *self {
            SessionOutcome::BatchComplete { processed }
            | SessionOutcome::IdleTimeout { processed }
            | SessionOutcome::StreamClosed { processed } => processed,
            SessionOutcome::NoMessages => 0,
        }
    }

    /// True when the whole process must exit, not just the session
    pub fn terminates_process(&self) -> bool {
        matches!(self, SessionOutcome::NoMessages)
    }
}

/// Drains at most `batch_size` messages from one channel
pub struct BatchConsumer<C, P> {
    channel: C,
    processor: P,
    settings: SessionSettings,
    metrics: Option<SharedMetrics>,
}

impl<C, P> BatchConsumer<C, P>
where
    C: QueueChannel,
    P: MessageProcessor,
{
    pub fn new(channel: C, processor: P, settings: SessionSettings) -> Self {
        Self {
            channel,
            processor,
            settings,
            metrics: None,
        }
    }

    /// Record per-message observations
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Give the channel back, e.g. to close it
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Run the session to completion
    ///
    /// Errors only come from setup (prefetch, consumer registration); once
    /// messages flow every failure is logged and contained.
    pub async fn run(&mut self) -> Result<SessionOutcome, BrokerError> {
        let batch_size = self.settings.batch_size;
        let idle_timeout = self.settings.idle_timeout;

        self.channel.set_prefetch(batch_size).await?;
        self.channel.start_consuming().await?;
        info!(
            batch_size,
            idle_timeout = ?idle_timeout,
            "Consumer registered, waiting for messages"
        );

        let mut processed: u32 = 0;
        let mut idle_deadline = Instant::now() + idle_timeout;

        loop {
            // The deadline is polled first so an expired window always wins
            // over a delivery that happens to be ready at the same time.
            let next = tokio::select! {
                biased;
                _ = tokio::time::sleep_until(idle_deadline) => None,
                next = self.channel.next_delivery() => Some(next),
            };

            match next {
                None if processed == 0 => {
                    info!(
                        idle_timeout = ?idle_timeout,
                        grace_period = ?self.settings.grace_period,
                        "No messages received, waiting out grace period before exiting"
                    );
                    tokio::time::sleep(self.settings.grace_period).await;
                    return Ok(SessionOutcome::NoMessages);
                }
                None => {
                    info!(
                        processed,
                        idle_timeout = ?idle_timeout,
                        "No new messages within idle timeout, ending session"
                    );
                    return Ok(SessionOutcome::IdleTimeout { processed });
                }
                Some(None) => {
                    warn!(processed, "Delivery stream closed by broker");
                    return Ok(SessionOutcome::StreamClosed { processed });
                }
                Some(Some(Err(e))) => {
                    warn!(error = %e, processed, "Delivery failed, ending session");
                    return Ok(SessionOutcome::StreamClosed { processed });
                }
                Some(Some(Ok(delivery))) => {
                    self.handle(&delivery).await;
                    processed += 1;
                    idle_deadline = Instant::now() + idle_timeout;
                    info!(processed, "Processed message");

                    if processed >= u32::from(batch_size) {
                        info!(processed, "Batch limit reached, ending session");
                        return Ok(SessionOutcome::BatchComplete { processed });
                    }
                }
            }
        }
    }

    /// Process then acknowledge; an ack failure is logged, not retried
    async fn handle(&mut self, delivery: &Delivery) {
        let start = Instant::now();
        info!(
            delivery_tag = delivery.delivery_tag,
            body = %String::from_utf8_lossy(&delivery.body),
            "Received a message"
        );

        self.processor.process(delivery).await;

        let outcome = match self.channel.ack(delivery.delivery_tag).await {
            Ok(()) => MessageOutcome::Acked,
            Err(e) => {
                warn!(error = %e, "Error acknowledging message");
                MessageOutcome::AckFailed
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_message(outcome, start.elapsed().as_secs_f64());
        }
    }
}
