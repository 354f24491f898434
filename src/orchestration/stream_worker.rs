//! # Stream Worker
//!
//! Delivery loops for both transports. [`IngestStreamWorker`] polls the
//! shared work queue with a visibility timeout and drives the processor
//! for each delivery; [`OutboxTopicConsumer`] does the same for broker
//! envelopes relayed by the outbox publisher. Both acknowledge a delivery
//! only when the processing outcome says so, letting the transport's
//! redelivery clock drive retries.
//!
//! Poison deliveries (payloads that fail to parse) are acknowledged and
//! dropped without touching the task store, so a malformed payload can
//! never wedge a consumer.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, StreamConfig};
use crate::error::Result;
use crate::messaging::{DeadLetterMessage, IngestQueueClient, IngestTaskMessage};
use crate::orchestration::processor::{IngestTaskProcessor, ProcessingOutcome};

/// Live consumer loop over the shared work queue.
pub struct IngestStreamWorker {
    client: IngestQueueClient,
    processor: Arc<IngestTaskProcessor>,
    queue: QueueConfig,
    stream: StreamConfig,
    consumer_name: String,
}

impl IngestStreamWorker {
    pub fn new(
        client: IngestQueueClient,
        processor: Arc<IngestTaskProcessor>,
        queue: QueueConfig,
        stream: StreamConfig,
    ) -> Self {
        let consumer_name = format!("c-{}", Uuid::new_v4());
        Self {
            client,
            processor,
            queue,
            stream,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Create the work queue and dead-letter queue if absent. Idempotent,
    /// so concurrently starting workers all succeed.
    pub async fn ensure_queues(&self) -> Result<()> {
        self.client.ensure_queue(&self.queue.stream_queue).await?;
        self.client.ensure_queue(&self.queue.dlq_queue).await?;
        Ok(())
    }

    /// Poll until the task is cancelled. Sleeps `poll_interval_ms` when a
    /// poll comes back empty; errors are logged and retried after the same
    /// interval rather than crashing the loop.
    pub async fn run(&self) {
        info!(
            consumer = %self.consumer_name,
            queue = %self.queue.stream_queue,
            "Stream worker started"
        );
        loop {
            match self.poll_once().await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(self.stream.poll_interval_ms)).await;
                }
                Ok(count) => {
                    debug!(consumer = %self.consumer_name, count, "Processed deliveries");
                }
                Err(e) => {
                    error!(consumer = %self.consumer_name, error = %e, "Poll failed");
                    tokio::time::sleep(Duration::from_millis(self.stream.poll_interval_ms)).await;
                }
            }
        }
    }

    /// Read and process one batch. Returns the number of deliveries
    /// handled (including poison drops).
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self
            .client
            .read_batch(
                &self.queue.stream_queue,
                self.stream.visibility_timeout_seconds,
                self.stream.batch_size,
            )
            .await?;

        let mut handled = 0;
        for message in messages {
            self.handle_delivery(message.msg_id, &message.message).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Process a single delivery and decide its acknowledgment.
    #[instrument(skip_all, fields(consumer = %self.consumer_name, delivery_id))]
    async fn handle_delivery(&self, delivery_id: i64, payload: &serde_json::Value) -> Result<()> {
        let message = match IngestTaskMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(delivery_id, error = %e, "Poison delivery, dropping");
                self.client.ack(&self.queue.stream_queue, delivery_id).await?;
                return Ok(());
            }
        };

        let outcome = self
            .processor
            .process(
                message.task_id,
                message.user_id,
                message.document_id,
                &message.file_path,
            )
            .await?;

        if outcome == ProcessingOutcome::Dead {
            self.write_dead_letter(&message, delivery_id).await?;
        }

        if outcome.should_ack() {
            self.client.ack(&self.queue.stream_queue, delivery_id).await?;
        }

        debug!(
            task_id = %message.task_id,
            outcome = %outcome,
            acked = outcome.should_ack(),
            "Delivery handled"
        );
        Ok(())
    }

    /// Write the forensic pointer for an exhausted task to the DLQ.
    async fn write_dead_letter(&self, message: &IngestTaskMessage, delivery_id: i64) -> Result<()> {
        let record = DeadLetterMessage {
            task_id: message.task_id.to_string(),
            source_queue: self.queue.stream_queue.clone(),
            source_group: self.queue.group.clone(),
            source_delivery_id: delivery_id.to_string(),
        };
        self.client
            .send(&self.queue.dlq_queue, &serde_json::to_value(&record)?)
            .await?;
        warn!(
            task_id = %message.task_id,
            dlq = %self.queue.dlq_queue,
            "Dead letter recorded"
        );
        Ok(())
    }
}

/// Consumer for broker envelopes on the outbox topic. The envelope wraps
/// the same business payload the stream transport carries, so processing
/// converges on the same processor and the same acknowledgment rules.
pub struct OutboxTopicConsumer {
    client: IngestQueueClient,
    processor: Arc<IngestTaskProcessor>,
    topic: String,
    batch_size: i32,
    poll_interval_ms: u64,
    visibility_timeout_seconds: u32,
}

impl OutboxTopicConsumer {
    pub fn new(
        client: IngestQueueClient,
        processor: Arc<IngestTaskProcessor>,
        topic: String,
        batch_size: i32,
        poll_interval_ms: u64,
        visibility_timeout_seconds: u32,
    ) -> Self {
        Self {
            client,
            processor,
            topic,
            batch_size,
            poll_interval_ms,
            visibility_timeout_seconds,
        }
    }

    pub async fn ensure_topic(&self) -> Result<()> {
        self.client.ensure_queue(&self.topic).await?;
        Ok(())
    }

    pub async fn run(&self) {
        info!(topic = %self.topic, "Outbox topic consumer started");
        loop {
            match self.poll_once().await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(self.poll_interval_ms)).await;
                }
                Ok(count) => {
                    debug!(topic = %self.topic, count, "Processed envelopes");
                }
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Poll failed");
                    tokio::time::sleep(Duration::from_millis(self.poll_interval_ms)).await;
                }
            }
        }
    }

    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self
            .client
            .read_batch(&self.topic, self.visibility_timeout_seconds, self.batch_size)
            .await?;

        let mut handled = 0;
        for message in messages {
            self.handle_envelope(message.msg_id, &message.message).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Unwrap one broker envelope and process its payload. Either layer
    /// failing to parse makes the delivery poison.
    async fn handle_envelope(&self, delivery_id: i64, raw: &serde_json::Value) -> Result<()> {
        let parsed = serde_json::from_value::<crate::messaging::BrokerEnvelope>(raw.clone())
            .ok()
            .and_then(|envelope| {
                serde_json::from_str::<serde_json::Value>(&envelope.payload).ok()
            })
            .and_then(|payload| IngestTaskMessage::parse(&payload).ok());

        let Some(message) = parsed else {
            warn!(delivery_id, "Poison envelope, dropping");
            self.client.ack(&self.topic, delivery_id).await?;
            return Ok(());
        };

        let outcome = self
            .processor
            .process(
                message.task_id,
                message.user_id,
                message.document_id,
                &message.file_path,
            )
            .await?;

        if outcome.should_ack() {
            self.client.ack(&self.topic, delivery_id).await?;
        }

        debug!(
            task_id = %message.task_id,
            outcome = %outcome,
            acked = outcome.should_ack(),
            "Envelope handled"
        );
        Ok(())
    }
}
