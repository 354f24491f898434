//! # Outbox Publisher
//!
//! Relay loop for the transactional outbox: fetches due events in FIFO
//! order and pushes each to the broker, with the same exponential backoff
//! and dead-letter semantics the task pipeline uses. A single publisher
//! instance is assumed; the due fetch carries no claim.
//!
//! The broker seam is [`BrokerPublisher`], a one-method trait. The
//! default implementation relays envelopes onto a pgmq queue named after
//! the topic, which is what the outbox topic consumer reads.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OutboxConfig;
use crate::error::Result;
use crate::messaging::{BrokerEnvelope, IngestQueueClient, MessagingError};
use crate::models::OutboxEvent;
use crate::orchestration::backoff::{truncate_error, RetryPolicy};

/// Destination broker for staged outbox events.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> std::result::Result<(), MessagingError>;
}

/// Broker backed by pgmq: one queue per topic, envelope per message.
pub struct PgmqBrokerPublisher {
    client: IngestQueueClient,
}

impl PgmqBrokerPublisher {
    pub fn new(client: IngestQueueClient) -> Self {
        Self { client }
    }

    pub async fn ensure_topic(&self, topic: &str) -> std::result::Result<(), MessagingError> {
        self.client.ensure_queue(topic).await
    }
}

#[async_trait]
impl BrokerPublisher for PgmqBrokerPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> std::result::Result<(), MessagingError> {
        let envelope = BrokerEnvelope {
            message_key: key.to_string(),
            payload: payload.to_string(),
        };
        let value = serde_json::to_value(&envelope)
            .map_err(|e| MessagingError::publish_failed(topic, e.to_string()))?;
        self.client.send(topic, &value).await?;
        Ok(())
    }
}

/// Relay loop draining the outbox table to the broker.
pub struct OutboxPublisher {
    pool: PgPool,
    broker: Arc<dyn BrokerPublisher>,
    config: OutboxConfig,
    policy: RetryPolicy,
}

impl OutboxPublisher {
    pub fn new(pool: PgPool, broker: Arc<dyn BrokerPublisher>, config: OutboxConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            pool,
            broker,
            config,
            policy,
        }
    }

    /// Relay until the task is cancelled, pausing `publish_interval_ms`
    /// between empty rounds. Errors are logged and the loop continues.
    pub async fn run(&self) {
        info!(topic = %self.config.topic, "Outbox publisher started");
        loop {
            match self.publish_pending().await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(self.config.publish_interval_ms))
                        .await;
                }
                Ok(count) => {
                    debug!(count, "Relayed outbox events");
                }
                Err(e) => {
                    error!(error = %e, "Outbox relay round failed");
                    tokio::time::sleep(Duration::from_millis(self.config.publish_interval_ms))
                        .await;
                }
            }
        }
    }

    /// One relay round over the due batch. Returns how many events were
    /// handled (sent, retried, or dead-lettered).
    #[instrument(skip(self))]
    pub async fn publish_pending(&self) -> Result<usize> {
        let now = Utc::now();
        let due = OutboxEvent::find_due_for_topic(
            &self.pool,
            &self.config.topic,
            now,
            i64::from(self.config.publish_batch_size),
        )
        .await?;

        let mut handled = 0;
        for event in due {
            self.relay_event(&event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn relay_event(&self, event: &OutboxEvent) -> Result<()> {
        // A row whose budget is already spent should never be due; if one
        // shows up anyway (manual edit, config lowered between restarts),
        // retire it instead of publishing forever.
        if self.policy.is_exhausted(event.attempt_count) {
            let message = format!(
                "exceeded max_attempts={} before publish",
                self.policy.max_attempts
            );
            OutboxEvent::mark_dead(&self.pool, event.id, event.attempt_count, &message).await?;
            warn!(event_id = %event.id, "Stale exhausted outbox event retired");
            return Ok(());
        }

        match self
            .broker
            .publish(&event.topic, &event.message_key, &event.payload)
            .await
        {
            Ok(()) => {
                let sent_at = Utc::now();
                OutboxEvent::mark_sent(&self.pool, event.id, sent_at).await?;
                info!(
                    event_id = %event.id,
                    topic = %event.topic,
                    latency_ms = publish_latency_ms(event.created_at, sent_at),
                    "Outbox event published"
                );
            }
            Err(e) => {
                self.record_publish_failure(event, &e).await?;
            }
        }
        Ok(())
    }

    async fn record_publish_failure(
        &self,
        event: &OutboxEvent,
        error: &MessagingError,
    ) -> Result<()> {
        let next_attempt = event.attempt_count.saturating_add(1);
        let message = truncate_error(&error.to_string());

        if self.policy.is_exhausted(next_attempt) {
            OutboxEvent::mark_dead(&self.pool, event.id, next_attempt, &message).await?;
            warn!(
                event_id = %event.id,
                attempt = next_attempt,
                error = %message,
                "Outbox event attempts exhausted, marked DEAD"
            );
        } else {
            let delay = self.policy.backoff(next_attempt);
            let due = Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::max_value());
            OutboxEvent::mark_retrying(&self.pool, event.id, next_attempt, due, &message).await?;
            debug!(
                event_id = %event.id,
                attempt = next_attempt,
                next_retry_at = %due,
                error = %message,
                "Outbox publish failed, will retry"
            );
        }
        Ok(())
    }
}

fn publish_latency_ms(created_at: DateTime<Utc>, sent_at: DateTime<Utc>) -> i64 {
    (sent_at - created_at).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_latency() {
        let created = Utc::now();
        let sent = created + ChronoDuration::milliseconds(1_500);
        assert_eq!(publish_latency_ms(created, sent), 1_500);
    }
}
