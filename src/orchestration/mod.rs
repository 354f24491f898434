//! # Pipeline Orchestration
//!
//! The moving parts of the ingestion pipeline: retry policy, the task
//! state service, the per-attempt processor, the delivery loops for both
//! transports, and the composition root that wires them together.

pub mod backoff;
pub mod enqueuer;
pub mod outbox_publisher;
pub mod processor;
pub mod reclaimer;
pub mod state_service;
pub mod stream_worker;
pub mod system;

pub use backoff::{truncate_error, RetryPolicy};
pub use enqueuer::IngestTaskEnqueuer;
pub use outbox_publisher::{BrokerPublisher, OutboxPublisher, PgmqBrokerPublisher};
pub use processor::{IngestTaskProcessor, ProcessingOutcome};
pub use reclaimer::PendingReclaimer;
pub use state_service::{FailureDisposition, IngestTaskStateService};
pub use stream_worker::{IngestStreamWorker, OutboxTopicConsumer};
pub use system::IngestPipelineSystem;
