//! # Ingestor Seam
//!
//! The pipeline's boundary to the actual document processing (PDF text
//! extraction, segmentation, embedding, vector upsert). Implementations
//! live outside this crate; the pipeline only requires a single blocking
//! attempt that reports segment progress as it goes and fails with an
//! opaque error.

use async_trait::async_trait;
use thiserror::Error;

/// Opaque ingestion failure. The pipeline never inspects the cause; it
/// truncates the message and drives the retry state machine with it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct IngestFailure {
    pub message: String,
}

impl IngestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receives segment-level progress during an ingestion attempt.
/// Implementations persist best-effort; a failed progress write must not
/// abort the attempt.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, processed_segments: i32, total_segments: i32);
}

/// Produces segmented and embedded content for one document file.
/// Synchronous from the pipeline's point of view: a single attempt per
/// call, progress via the sink, failure as one opaque error.
#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    async fn ingest(
        &self,
        user_id: i64,
        document_id: i64,
        file_path: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), IngestFailure>;
}
