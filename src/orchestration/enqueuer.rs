//! # Task Enqueuer
//!
//! The pipeline's front door: mints a task row and hands its reference to
//! the configured transport. On the stream transport the row is committed
//! first and the reference sent after; on the outbox transport the row and
//! its staged broker event are written in one transaction, so the
//! reference cannot be announced without the row existing (and vice
//! versa).
//!
//! Also serves the status-polling read path, scoped to the owning user.

use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::{OutboxConfig, QueueConfig, QueueTransport};
use crate::error::Result;
use crate::messaging::{IngestQueueClient, IngestTaskMessage};
use crate::models::{IngestTask, IngestTaskSnapshot, NewIngestTask, NewOutboxEvent, OutboxEvent};

/// Creates tasks and dispatches their references.
pub struct IngestTaskEnqueuer {
    pool: PgPool,
    client: IngestQueueClient,
    queue: QueueConfig,
    outbox: OutboxConfig,
}

impl IngestTaskEnqueuer {
    pub fn new(
        pool: PgPool,
        client: IngestQueueClient,
        queue: QueueConfig,
        outbox: OutboxConfig,
    ) -> Self {
        Self {
            pool,
            client,
            queue,
            outbox,
        }
    }

    /// Create a QUEUED task for a document and dispatch its reference on
    /// the configured transport. Returns the snapshot served back to the
    /// caller who triggered the ingestion.
    #[instrument(skip(self))]
    pub async fn enqueue(
        &self,
        user_id: i64,
        document_id: i64,
        file_path: &str,
    ) -> Result<IngestTaskSnapshot> {
        let new_task = NewIngestTask {
            id: Uuid::new_v4(),
            user_id,
            document_id,
            file_path: file_path.to_string(),
        };

        let task = match self.queue.transport {
            QueueTransport::Stream => self.enqueue_stream(&new_task).await?,
            QueueTransport::Outbox => self.enqueue_outbox(&new_task).await?,
        };

        info!(
            task_id = %task.id,
            transport = ?self.queue.transport,
            "Ingest task enqueued"
        );
        Ok(task.snapshot())
    }

    /// Stream transport: commit the row, then send the reference. A send
    /// failure leaves a committed QUEUED row and surfaces the error; a
    /// retried enqueue for the same document creates a fresh task.
    async fn enqueue_stream(&self, new_task: &NewIngestTask) -> Result<IngestTask> {
        let task = IngestTask::create(&self.pool, new_task).await?;

        let message = IngestTaskMessage::new(
            task.id,
            task.user_id,
            task.document_id,
            task.file_path.clone(),
        );
        let delivery_id = self
            .client
            .send(&self.queue.stream_queue, &message.to_wire())
            .await?;
        debug!(task_id = %task.id, delivery_id, "Task reference sent to stream");
        Ok(task)
    }

    /// Outbox transport: the task row and its staged broker event commit
    /// or roll back together.
    async fn enqueue_outbox(&self, new_task: &NewIngestTask) -> Result<IngestTask> {
        let mut tx = self.pool.begin().await?;

        let task = IngestTask::create(&mut *tx, new_task).await?;

        let message = IngestTaskMessage::new(
            task.id,
            task.user_id,
            task.document_id,
            task.file_path.clone(),
        );
        let event = OutboxEvent::create(
            &mut *tx,
            &NewOutboxEvent {
                id: Uuid::new_v4(),
                topic: self.outbox.topic.clone(),
                message_key: task.id.to_string(),
                payload: message.to_wire().to_string(),
            },
        )
        .await?;

        tx.commit().await?;
        debug!(task_id = %task.id, event_id = %event.id, "Task and outbox event staged");
        Ok(task)
    }

    /// Status polling, scoped to the owning user. `None` covers both a
    /// missing task and one belonging to someone else.
    pub async fn task_snapshot(
        &self,
        user_id: i64,
        task_id: Uuid,
    ) -> Result<Option<IngestTaskSnapshot>> {
        let task = IngestTask::find_by_id_for_user(&self.pool, task_id, user_id).await?;
        Ok(task.map(|t| t.snapshot()))
    }
}
