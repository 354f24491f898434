//! # Task Processor
//!
//! Per-attempt orchestrator shared by every delivery path (live worker,
//! reclaimer, outbox consumer). One call is one attempt: eligibility
//! checks, ownership acquisition through the state service, delegation to
//! the ingestor, and mapping of the outcome to an acknowledgment
//! decision.
//!
//! Idempotent under at-least-once redelivery: terminal tasks short-circuit
//! to `Skipped`, the ownership gate admits exactly one concurrent owner,
//! and progress fields are overwritten, never appended.
//!
//! Every ingestor error is caught at this boundary and converted into a
//! state transition. Only genuine programming defects (panics) escape and
//! crash the calling worker; the reclaimer's idle-time sweep recovers the
//! abandoned delivery later.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ingest::{DocumentIngestor, ProgressSink};
use crate::models::{IngestTask, TaskStatus};
use crate::orchestration::state_service::{FailureDisposition, IngestTaskStateService};

/// Persist progress at most every this many segments...
const PROGRESS_PERSIST_EVERY_SEGMENTS: i32 = 5;
/// ...or whenever this much time has passed since the last persist.
const PROGRESS_PERSIST_MIN_INTERVAL: Duration = Duration::from_millis(1_000);

/// Outcome of one processing attempt, tagged with whether the delivery
/// that triggered it should be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Ingestion completed; task is terminal SUCCEEDED
    Succeeded,
    /// Attempt failed with budget remaining; redelivery drives the retry
    Retry,
    /// Attempt failed and exhausted the budget; task is terminal DEAD
    Dead,
    /// RETRYING task whose due time has not arrived; untouched
    NotDue,
    /// Lost the ownership race to a concurrent owner; untouched
    Busy,
    /// Task missing, already terminal, or reference unusable
    Skipped,
}

impl ProcessingOutcome {
    /// Whether the caller should acknowledge the delivery. Unacked
    /// deliveries are redelivered by the transport after its idle
    /// timeout, which is what drives retries.
    pub fn should_ack(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Dead | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Retry => "retry",
            Self::Dead => "dead",
            Self::NotDue => "not_due",
            Self::Busy => "busy",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attempt orchestrator for ingest tasks.
pub struct IngestTaskProcessor {
    pool: PgPool,
    state_service: Arc<IngestTaskStateService>,
    ingestor: Arc<dyn DocumentIngestor>,
}

impl IngestTaskProcessor {
    pub fn new(
        pool: PgPool,
        state_service: Arc<IngestTaskStateService>,
        ingestor: Arc<dyn DocumentIngestor>,
    ) -> Self {
        Self {
            pool,
            state_service,
            ingestor,
        }
    }

    /// Run one processing attempt for a task reference.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn process(
        &self,
        task_id: Uuid,
        user_id: i64,
        document_id: i64,
        file_path: &str,
    ) -> Result<ProcessingOutcome> {
        if file_path.trim().is_empty() {
            debug!("Task reference has no file path, skipping");
            return Ok(ProcessingOutcome::Skipped);
        }

        let Some(task) = IngestTask::find_by_id(&self.pool, task_id).await? else {
            debug!("Task not found, skipping");
            return Ok(ProcessingOutcome::Skipped);
        };

        if task.is_terminal() {
            debug!(status = %task.status, "Task already terminal, skipping");
            return Ok(ProcessingOutcome::Skipped);
        }

        let now = Utc::now();
        if task.parsed_status()? == TaskStatus::Retrying {
            if let Some(due) = task.next_retry_at {
                if due > now {
                    debug!(next_retry_at = %due, "Task not yet due");
                    return Ok(ProcessingOutcome::NotDue);
                }
            }
        }

        if !self.state_service.try_mark_running(&task, now).await? {
            debug!("Lost ownership race for task");
            return Ok(ProcessingOutcome::Busy);
        }

        let recorder = ProgressRecorder::new(self.pool.clone(), task.id);
        match self
            .ingestor
            .ingest(user_id, document_id, file_path, &recorder)
            .await
        {
            Ok(()) => {
                self.state_service.mark_succeeded(&task, Utc::now()).await?;
                Ok(ProcessingOutcome::Succeeded)
            }
            Err(failure) => {
                let disposition = self
                    .state_service
                    .mark_failure(&task, &failure, Utc::now())
                    .await?;
                Ok(match disposition {
                    FailureDisposition::Retry => ProcessingOutcome::Retry,
                    FailureDisposition::Dead => ProcessingOutcome::Dead,
                })
            }
        }
    }
}

/// Throttled progress persistence: writes at most every
/// `PROGRESS_PERSIST_EVERY_SEGMENTS` segments or
/// `PROGRESS_PERSIST_MIN_INTERVAL`, and always on the final segment, to
/// bound write amplification on large documents. Progress is capped at 99
/// until the success transition sets 100.
struct ProgressRecorder {
    pool: PgPool,
    task_id: Uuid,
    last_persist: Mutex<Option<Instant>>,
}

impl ProgressRecorder {
    fn new(pool: PgPool, task_id: Uuid) -> Self {
        Self {
            pool,
            task_id,
            last_persist: Mutex::new(None),
        }
    }

    fn should_persist(&self, processed: i32, total: i32) -> bool {
        if processed == total {
            return true;
        }
        if processed % PROGRESS_PERSIST_EVERY_SEGMENTS == 0 {
            return true;
        }
        let last = *self.last_persist.lock();
        match last {
            Some(at) => at.elapsed() > PROGRESS_PERSIST_MIN_INTERVAL,
            None => true,
        }
    }
}

#[async_trait]
impl ProgressSink for ProgressRecorder {
    async fn report(&self, processed_segments: i32, total_segments: i32) {
        if !self.should_persist(processed_segments, total_segments) {
            return;
        }

        let progress = progress_percent(processed_segments, total_segments);
        let result = IngestTask::update_progress(
            &self.pool,
            self.task_id,
            processed_segments,
            total_segments,
            progress,
            Utc::now(),
        )
        .await;

        match result {
            Ok(()) => {
                *self.last_persist.lock() = Some(Instant::now());
            }
            Err(e) => {
                // Progress is best effort; the attempt keeps going.
                warn!(task_id = %self.task_id, error = %e, "Failed to persist progress");
            }
        }
    }
}

fn progress_percent(processed: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    let percent = (i64::from(processed) * 100) / i64::from(total);
    percent.clamp(0, 99) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_decision_per_outcome() {
        assert!(ProcessingOutcome::Succeeded.should_ack());
        assert!(ProcessingOutcome::Dead.should_ack());
        assert!(ProcessingOutcome::Skipped.should_ack());

        assert!(!ProcessingOutcome::Retry.should_ack());
        assert!(!ProcessingOutcome::NotDue.should_ack());
        assert!(!ProcessingOutcome::Busy.should_ack());
    }

    #[test]
    fn test_progress_percent_caps_at_99() {
        assert_eq!(progress_percent(0, 10), 0);
        assert_eq!(progress_percent(5, 10), 50);
        assert_eq!(progress_percent(10, 10), 99);
        assert_eq!(progress_percent(25, 10), 99);
    }

    #[test]
    fn test_progress_percent_with_unknown_total() {
        assert_eq!(progress_percent(3, 0), 0);
        assert_eq!(progress_percent(3, -1), 0);
    }
}
