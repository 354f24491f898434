//! Stream transport integration tests: end-to-end enqueue/process,
//! poison handling, retry via redelivery, dead-lettering, and the
//! reclaim sweep.

mod common;

use std::sync::Arc;
use uuid::Uuid;

use ingest_core::config::{QueueConfig, ReclaimConfig, StreamConfig};
use ingest_core::messaging::IngestQueueClient;
use ingest_core::models::{IngestTask, IngestTaskTransition};
use ingest_core::orchestration::{
    IngestStreamWorker, IngestTaskEnqueuer, IngestTaskProcessor, IngestTaskStateService,
    PendingReclaimer,
};

struct Harness {
    pool: sqlx::PgPool,
    client: IngestQueueClient,
    queue: QueueConfig,
    stream: StreamConfig,
    enqueuer: IngestTaskEnqueuer,
}

impl Harness {
    /// Fresh uniquely-named queues, zero visibility timeout and zero
    /// backoff so redelivery is immediate.
    async fn new(
        pool: sqlx::PgPool,
        ingestor: Arc<dyn ingest_core::ingest::DocumentIngestor>,
        max_attempts: i32,
    ) -> (Self, IngestStreamWorker) {
        let client = IngestQueueClient::new_with_pool(pool.clone()).await;
        let queue = QueueConfig {
            stream_queue: common::unique_queue("t_work"),
            dlq_queue: common::unique_queue("t_dlq"),
            ..QueueConfig::default()
        };
        let stream = StreamConfig {
            max_attempts,
            base_backoff_ms: 0,
            visibility_timeout_seconds: 0,
            reclaim: ReclaimConfig {
                idle_ms: 0,
                ..ReclaimConfig::default()
            },
            ..StreamConfig::default()
        };

        let state_service = Arc::new(IngestTaskStateService::new(
            pool.clone(),
            stream.retry_policy(),
        ));
        let processor = Arc::new(IngestTaskProcessor::new(
            pool.clone(),
            state_service,
            ingestor,
        ));
        let enqueuer = IngestTaskEnqueuer::new(
            pool.clone(),
            client.clone(),
            queue.clone(),
            ingest_core::config::OutboxConfig::default(),
        );

        let worker = IngestStreamWorker::new(
            client.clone(),
            processor.clone(),
            queue.clone(),
            stream.clone(),
        );
        worker.ensure_queues().await.unwrap();

        let harness = Self {
            pool,
            client,
            queue,
            stream,
            enqueuer,
        };
        (harness, worker)
    }

    fn reclaimer(&self, ingestor: Arc<dyn ingest_core::ingest::DocumentIngestor>) -> PendingReclaimer {
        let state_service = Arc::new(IngestTaskStateService::new(
            self.pool.clone(),
            self.stream.retry_policy(),
        ));
        let processor = Arc::new(IngestTaskProcessor::new(
            self.pool.clone(),
            state_service,
            ingestor,
        ));
        PendingReclaimer::new(
            self.client.clone(),
            processor,
            self.queue.clone(),
            self.stream.clone(),
        )
    }

    /// Peek the DLQ without consuming it (zero visibility timeout).
    async fn dlq_records(&self) -> Vec<serde_json::Value> {
        self.client
            .read_batch(&self.queue.dlq_queue, 0, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect()
    }

    async fn drop_queues(&self) {
        let _ = self.client.drop_queue(&self.queue.stream_queue).await;
        let _ = self.client.drop_queue(&self.queue.dlq_queue).await;
    }
}

#[tokio::test]
async fn test_enqueue_then_poll_succeeds_end_to_end() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let ingestor = Arc::new(common::ScriptedIngestor::succeeding(12));
    let (harness, worker) = Harness::new(pool.clone(), ingestor, 10).await;

    let snapshot = harness
        .enqueuer
        .enqueue(1, 100, "/data/uploads/doc.pdf")
        .await
        .unwrap();
    assert_eq!(snapshot.status, "QUEUED");

    let handled = worker.poll_once().await.unwrap();
    assert_eq!(handled, 1);

    let task = IngestTask::find_by_id(&pool, snapshot.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "SUCCEEDED");
    assert_eq!(task.progress, 100);
    assert_eq!(task.processed_segments, 12);
    assert_eq!(task.total_segments, 12);

    // Acked: nothing left to redeliver.
    let redelivered = worker.poll_once().await.unwrap();
    assert_eq!(redelivered, 0);
    harness.drop_queues().await;
}

#[tokio::test]
async fn test_poison_delivery_is_acked_and_dropped() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let ingestor = Arc::new(common::ScriptedIngestor::succeeding(1));
    let (harness, worker) = Harness::new(pool.clone(), ingestor, 10).await;

    harness
        .client
        .send(
            &harness.queue.stream_queue,
            &serde_json::json!({"taskId": "not-a-uuid", "userId": "1"}),
        )
        .await
        .unwrap();

    let handled = worker.poll_once().await.unwrap();
    assert_eq!(handled, 1);

    // Dropped for good: with a zero visibility timeout an unacked
    // delivery would reappear immediately.
    let redelivered = worker.poll_once().await.unwrap();
    assert_eq!(redelivered, 0);
    harness.drop_queues().await;
}

#[tokio::test]
async fn test_redelivery_retries_until_dead_letter() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let ingestor = Arc::new(common::ScriptedIngestor::always_failing());
    let (harness, worker) = Harness::new(pool.clone(), ingestor, 2).await;

    let snapshot = harness
        .enqueuer
        .enqueue(1, 100, "/data/uploads/doc.pdf")
        .await
        .unwrap();

    // Attempt 1 fails: RETRYING, delivery left unacked.
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    let task = IngestTask::find_by_id(&pool, snapshot.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "RETRYING");
    assert_eq!(task.attempt_count, 1);

    // Zero visibility timeout: attempt 2 rides the immediate redelivery,
    // exhausts the budget, dead-letters, and acks.
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    let task = IngestTask::find_by_id(&pool, snapshot.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "DEAD");
    assert_eq!(task.attempt_count, 2);

    let dlq = harness.dlq_records().await;
    assert_eq!(dlq.len(), 1, "exactly one dead letter expected");
    assert_eq!(
        dlq[0].get("taskId").and_then(|v| v.as_str()),
        Some(snapshot.task_id.to_string().as_str())
    );

    assert_eq!(worker.poll_once().await.unwrap(), 0, "delivery must be acked");

    let transitions = IngestTaskTransition::list_for_task(&pool, snapshot.task_id)
        .await
        .unwrap();
    let path: Vec<&str> = transitions.iter().map(|t| t.to_status.as_str()).collect();
    assert_eq!(path, vec!["RUNNING", "RETRYING", "RUNNING", "DEAD"]);
    harness.drop_queues().await;
}

#[tokio::test]
async fn test_reclaimer_steals_abandoned_delivery() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    // The "crashed" consumer reads the delivery and never acks.
    let ingestor = Arc::new(common::ScriptedIngestor::succeeding(3));
    let (harness, _worker) = Harness::new(pool.clone(), ingestor.clone(), 10).await;

    let snapshot = harness
        .enqueuer
        .enqueue(1, 100, "/data/uploads/doc.pdf")
        .await
        .unwrap();
    let abandoned = harness
        .client
        .read_batch(&harness.queue.stream_queue, 0, 10)
        .await
        .unwrap();
    assert_eq!(abandoned.len(), 1);

    // idle_ms = 0: the sweep claims the entry immediately.
    let reclaimer = harness.reclaimer(ingestor);
    let claimed = reclaimer.reclaim_once().await.unwrap();
    assert_eq!(claimed, 1);

    let task = IngestTask::find_by_id(&pool, snapshot.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, "SUCCEEDED");
    harness.drop_queues().await;
}

#[tokio::test]
async fn test_reclaimed_poison_is_dead_lettered() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let ingestor = Arc::new(common::ScriptedIngestor::succeeding(1));
    let (harness, _worker) = Harness::new(pool.clone(), ingestor.clone(), 10).await;

    let task_id = Uuid::new_v4();
    harness
        .client
        .send(
            &harness.queue.stream_queue,
            &serde_json::json!({"taskId": task_id.to_string()}),
        )
        .await
        .unwrap();
    // Deliver once without acking so the entry is pending.
    let pending = harness
        .client
        .read_batch(&harness.queue.stream_queue, 0, 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let reclaimer = harness.reclaimer(ingestor);
    assert_eq!(reclaimer.reclaim_once().await.unwrap(), 1);

    let dlq = harness.dlq_records().await;
    assert_eq!(dlq.len(), 1);
    assert_eq!(
        dlq[0].get("taskId").and_then(|v| v.as_str()),
        Some(task_id.to_string().as_str())
    );
    harness.drop_queues().await;
}

#[tokio::test]
async fn test_claim_hands_entry_to_at_most_one_sweep() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let client = IngestQueueClient::new_with_pool(pool.clone()).await;
    let queue = common::unique_queue("t_claim");
    client.ensure_queue(&queue).await.unwrap();

    client
        .send(&queue, &serde_json::json!({"k": "v"}))
        .await
        .unwrap();
    client.read_batch(&queue, 0, 10).await.unwrap();

    let candidates = client.list_pending(&queue, 0, 10).await.unwrap();
    assert_eq!(candidates.len(), 1);

    // Two racing claims over the same snapshot of candidates.
    let (a, b) = tokio::join!(
        client.claim_pending(&queue, &candidates, 0, 0),
        client.claim_pending(&queue, &candidates, 0, 0)
    );
    let total = a.unwrap().len() + b.unwrap().len();
    assert_eq!(total, 1, "a pending entry must have at most one claimant");
    let _ = client.drop_queue(&queue).await;
}
