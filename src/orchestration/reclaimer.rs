//! # Pending Reclaimer
//!
//! Crash recovery for the stream transport. A worker that dies mid-attempt
//! leaves its delivery pending: delivered, unacknowledged, invisible until
//! the visibility timeout lapses. The reclaimer sweeps the queue on an
//! interval, steals entries that have sat idle past the configured
//! threshold, and reprocesses them through the same processor as the live
//! path.
//!
//! The claim is a version-checked compare-and-swap on the delivery count,
//! so overlapping sweeps (or a sweep racing the original consumer) hand
//! each entry to at most one claimant.
//!
//! Unlike the live worker, the reclaimer dead-letters poison payloads it
//! stole: a reclaimed poison entry already survived one consumer, and
//! dropping it silently a second time would erase the only trace of it.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, StreamConfig};
use crate::error::Result;
use crate::messaging::{
    ClaimedDelivery, DeadLetterMessage, IngestQueueClient, IngestTaskMessage,
};
use crate::orchestration::processor::{IngestTaskProcessor, ProcessingOutcome};

/// Periodic sweep that steals and reprocesses idle pending deliveries.
pub struct PendingReclaimer {
    client: IngestQueueClient,
    processor: Arc<IngestTaskProcessor>,
    queue: QueueConfig,
    stream: StreamConfig,
    reclaimer_name: String,
}

impl PendingReclaimer {
    pub fn new(
        client: IngestQueueClient,
        processor: Arc<IngestTaskProcessor>,
        queue: QueueConfig,
        stream: StreamConfig,
    ) -> Self {
        let reclaimer_name = format!("reclaimer-{}", Uuid::new_v4());
        Self {
            client,
            processor,
            queue,
            stream,
            reclaimer_name,
        }
    }

    pub fn reclaimer_name(&self) -> &str {
        &self.reclaimer_name
    }

    /// Sweep until the task is cancelled, pausing `interval_ms` between
    /// sweeps. Sweep errors are logged and the next interval proceeds.
    pub async fn run(&self) {
        info!(
            reclaimer = %self.reclaimer_name,
            queue = %self.queue.stream_queue,
            idle_ms = self.stream.reclaim.idle_ms,
            "Pending reclaimer started"
        );
        loop {
            if let Err(e) = self.reclaim_once().await {
                error!(reclaimer = %self.reclaimer_name, error = %e, "Reclaim sweep failed");
            }
            tokio::time::sleep(Duration::from_millis(self.stream.reclaim.interval_ms)).await;
        }
    }

    /// One sweep: list pending entries, claim the ones idle past the
    /// threshold, reprocess each claim. Returns how many were claimed.
    #[instrument(skip(self), fields(reclaimer = %self.reclaimer_name))]
    pub async fn reclaim_once(&self) -> Result<usize> {
        let pending = self
            .client
            .list_pending(
                &self.queue.stream_queue,
                self.stream.visibility_timeout_seconds,
                i64::from(self.stream.reclaim.batch_size),
            )
            .await?;

        let idle_threshold = self.stream.reclaim.idle_ms;
        let candidates: Vec<_> = pending
            .into_iter()
            .filter(|entry| entry.idle_ms >= idle_threshold as i64)
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let claimed = self
            .client
            .claim_pending(
                &self.queue.stream_queue,
                &candidates,
                self.stream.visibility_timeout_seconds,
                idle_threshold,
            )
            .await?;

        let count = claimed.len();
        for delivery in claimed {
            self.handle_claim(delivery).await?;
        }

        if count > 0 {
            info!(reclaimer = %self.reclaimer_name, count, "Reclaimed idle deliveries");
        }
        Ok(count)
    }

    async fn handle_claim(&self, delivery: ClaimedDelivery) -> Result<()> {
        let message = match IngestTaskMessage::parse(&delivery.message) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    delivery_id = delivery.delivery_id,
                    error = %e,
                    "Reclaimed poison delivery, dead-lettering"
                );
                let task_id = IngestTaskMessage::raw_task_id(&delivery.message)
                    .unwrap_or_else(|| "unknown".to_string());
                self.write_dead_letter(&task_id, delivery.delivery_id).await?;
                self.client
                    .ack(&self.queue.stream_queue, delivery.delivery_id)
                    .await?;
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
            self.write_dead_letter(&message.task_id.to_string(), delivery.delivery_id)
                .await?;
        }

        if outcome.should_ack() {
            self.client
                .ack(&self.queue.stream_queue, delivery.delivery_id)
                .await?;
        }

        debug!(
            task_id = %message.task_id,
            outcome = %outcome,
            acked = outcome.should_ack(),
            "Reclaimed delivery handled"
        );
        Ok(())
    }

    async fn write_dead_letter(&self, task_id: &str, delivery_id: i64) -> Result<()> {
        let record = DeadLetterMessage {
            task_id: task_id.to_string(),
            source_queue: self.queue.stream_queue.clone(),
            source_group: self.queue.group.clone(),
            source_delivery_id: delivery_id.to_string(),
        };
        self.client
            .send(&self.queue.dlq_queue, &serde_json::to_value(&record)?)
            .await?;
        warn!(task_id, dlq = %self.queue.dlq_queue, "Dead letter recorded");
        Ok(())
    }
}
