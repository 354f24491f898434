//! # Pipeline System
//!
//! Composition root: wires the state service, processor, enqueuer, and
//! the background loops for whichever transport the configuration
//! selects, then owns their join handles for shutdown.

use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{IngestConfig, QueueTransport};
use crate::error::Result;
use crate::ingest::DocumentIngestor;
use crate::messaging::IngestQueueClient;
use crate::orchestration::enqueuer::IngestTaskEnqueuer;
use crate::orchestration::outbox_publisher::{OutboxPublisher, PgmqBrokerPublisher};
use crate::orchestration::processor::IngestTaskProcessor;
use crate::orchestration::reclaimer::PendingReclaimer;
use crate::orchestration::state_service::IngestTaskStateService;
use crate::orchestration::stream_worker::{IngestStreamWorker, OutboxTopicConsumer};

/// A running ingestion pipeline: enqueue front door plus the background
/// loops for the configured transport.
pub struct IngestPipelineSystem {
    enqueuer: Arc<IngestTaskEnqueuer>,
    processor: Arc<IngestTaskProcessor>,
    handles: Vec<JoinHandle<()>>,
}

impl IngestPipelineSystem {
    /// Validate the configuration, ensure the queues exist, and spawn the
    /// background loops for the selected transport.
    pub async fn start(
        config: IngestConfig,
        pool: PgPool,
        ingestor: Arc<dyn DocumentIngestor>,
    ) -> Result<Self> {
        config.validate()?;

        let client = IngestQueueClient::new_with_pool(pool.clone()).await;
        let state_service = Arc::new(IngestTaskStateService::new(
            pool.clone(),
            config.stream.retry_policy(),
        ));
        let processor = Arc::new(IngestTaskProcessor::new(
            pool.clone(),
            state_service,
            ingestor,
        ));
        let enqueuer = Arc::new(IngestTaskEnqueuer::new(
            pool.clone(),
            client.clone(),
            config.queue.clone(),
            config.outbox.clone(),
        ));

        let mut handles = Vec::new();
        match config.queue.transport {
            QueueTransport::Stream => {
                let worker = Arc::new(IngestStreamWorker::new(
                    client.clone(),
                    processor.clone(),
                    config.queue.clone(),
                    config.stream.clone(),
                ));
                worker.ensure_queues().await?;
                handles.push(tokio::spawn({
                    let worker = worker.clone();
                    async move { worker.run().await }
                }));

                if config.stream.reclaim.enabled {
                    let reclaimer = Arc::new(PendingReclaimer::new(
                        client.clone(),
                        processor.clone(),
                        config.queue.clone(),
                        config.stream.clone(),
                    ));
                    handles.push(tokio::spawn(async move { reclaimer.run().await }));
                }
            }
            QueueTransport::Outbox => {
                let broker = PgmqBrokerPublisher::new(client.clone());
                broker.ensure_topic(&config.outbox.topic).await?;

                let publisher = Arc::new(OutboxPublisher::new(
                    pool.clone(),
                    Arc::new(broker),
                    config.outbox.clone(),
                ));
                handles.push(tokio::spawn(async move { publisher.run().await }));

                let consumer = Arc::new(OutboxTopicConsumer::new(
                    client.clone(),
                    processor.clone(),
                    config.outbox.topic.clone(),
                    config.stream.batch_size,
                    config.stream.poll_interval_ms,
                    config.stream.visibility_timeout_seconds,
                ));
                handles.push(tokio::spawn(async move { consumer.run().await }));
            }
        }

        info!(transport = ?config.queue.transport, "Ingest pipeline started");
        Ok(Self {
            enqueuer,
            processor,
            handles,
        })
    }

    /// The enqueue/status front door.
    pub fn enqueuer(&self) -> &Arc<IngestTaskEnqueuer> {
        &self.enqueuer
    }

    /// The shared per-attempt processor, useful for driving deliveries in
    /// process (tests, embedded runners).
    pub fn processor(&self) -> &Arc<IngestTaskProcessor> {
        &self.processor
    }

    /// Stop every background loop. Loops hold no cross-delivery state, so
    /// aborting between deliveries is safe; an aborted mid-attempt
    /// delivery is redelivered after its visibility timeout.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Ingest pipeline stopped");
    }
}

impl Drop for IngestPipelineSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
