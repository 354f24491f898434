//! # Ingest Core
//!
//! Asynchronous document-ingestion pipeline: durable per-document task
//! rows, a compare-and-swap ownership gate, exponential-backoff retries
//! with dead-lettering, and two interchangeable delivery transports (a
//! consumer-group style queue with idle-time reclaim, and a transactional
//! outbox relayed to a broker topic).
//!
//! ## Architecture
//!
//! - **models**: task rows, the append-only transition log, outbox events
//! - **messaging**: wire payloads and the pgmq-backed queue client
//! - **orchestration**: state service, per-attempt processor, delivery
//!   loops, and the [`orchestration::IngestPipelineSystem`] composition root
//! - **config**: YAML configuration with environment overlays
//!
//! The actual document processing (extraction, segmentation, embedding)
//! plugs in through [`ingest::DocumentIngestor`]; this crate owns
//! everything from enqueue to terminal state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ingest_core::config::ConfigManager;
//! use ingest_core::orchestration::IngestPipelineSystem;
//! # use std::sync::Arc;
//! # async fn example(pool: sqlx::PgPool, ingestor: Arc<dyn ingest_core::ingest::DocumentIngestor>) -> ingest_core::Result<()> {
//! let manager = ConfigManager::load()?;
//! let system = IngestPipelineSystem::start(manager.config().clone(), pool, ingestor).await?;
//! let snapshot = system.enqueuer().enqueue(42, 7, "/data/uploads/doc.pdf").await?;
//! println!("task {} is {}", snapshot.task_id, snapshot.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;

pub use error::{IngestCoreError, Result};
pub use ingest::{DocumentIngestor, IngestFailure, ProgressSink};
pub use models::{IngestTask, IngestTaskSnapshot, TaskStatus};
pub use orchestration::{IngestPipelineSystem, ProcessingOutcome};
