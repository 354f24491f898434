//! # Data Layer
//!
//! Durable records backing the ingestion pipeline: the task row with its
//! compare-and-swap ownership gate, the append-only transition log, and
//! the transactional outbox table.

pub mod ingest_task;
pub mod ingest_task_transition;
pub mod outbox_event;

pub use ingest_task::{IngestTask, IngestTaskSnapshot, NewIngestTask, TaskStatus};
pub use ingest_task_transition::{IngestTaskTransition, NewIngestTaskTransition};
pub use outbox_event::{NewOutboxEvent, OutboxEvent, OutboxEventStatus};
