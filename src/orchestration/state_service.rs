//! # Task State Service
//!
//! Encapsulates every legal task state transition. All mutations flow
//! through here so the invariants hold everywhere: `attempt_count` only
//! grows and only via [`IngestTaskStateService::mark_failure`];
//! `next_retry_at` is set exactly while RETRYING; terminal states are
//! never touched again; every transition appends one audit row in the
//! same transaction as the mutation it records.
//!
//! The ownership gate [`IngestTaskStateService::try_mark_running`] is the
//! pipeline's only mutual-exclusion primitive: a single guarded UPDATE
//! whose affected-row count decides the winner. Losing it is not an
//! error, it means another owner holds the task or the task is not due.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ingest::IngestFailure;
use crate::models::{IngestTask, IngestTaskTransition, NewIngestTaskTransition, TaskStatus};
use crate::orchestration::backoff::{truncate_error, RetryPolicy};

/// What a failed attempt resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Attempts remain; the task is RETRYING with a due time
    Retry,
    /// Budget exhausted; the task is DEAD
    Dead,
}

/// All legal state transitions for ingest tasks.
pub struct IngestTaskStateService {
    pool: PgPool,
    policy: RetryPolicy,
}

impl IngestTaskStateService {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt to take ownership: QUEUED/RETRYING -> RUNNING iff the
    /// stored status is still eligible and the task is due. Returns false
    /// when another owner already holds the row or it is not yet due.
    pub async fn try_mark_running(
        &self,
        task: &IngestTask,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let won = IngestTask::try_mark_running(&mut *tx, task.id, now).await?;
        if !won {
            tx.rollback().await?;
            debug!(task_id = %task.id, "Ownership gate lost or task not due");
            return Ok(false);
        }

        IngestTaskTransition::create(
            &mut *tx,
            &NewIngestTaskTransition {
                task_id: task.id,
                from_status: Some(task.status.clone()),
                to_status: TaskStatus::Running.to_string(),
                attempt_count: task.attempt_count,
                message: None,
            },
            now,
        )
        .await?;

        tx.commit().await?;
        debug!(task_id = %task.id, "Task marked RUNNING");
        Ok(true)
    }

    /// Terminal success: SUCCEEDED, full progress, retry fields cleared.
    pub async fn mark_succeeded(&self, task: &IngestTask, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        IngestTask::mark_succeeded(&mut *tx, task.id, now).await?;
        IngestTaskTransition::create(
            &mut *tx,
            &NewIngestTaskTransition {
                task_id: task.id,
                from_status: Some(TaskStatus::Running.to_string()),
                to_status: TaskStatus::Succeeded.to_string(),
                attempt_count: task.attempt_count,
                message: None,
            },
            now,
        )
        .await?;

        tx.commit().await?;
        info!(task_id = %task.id, "Task SUCCEEDED");
        Ok(())
    }

    /// Record a failed attempt. Increments the attempt count; RETRYING
    /// with an exponential-backoff due time while budget remains, DEAD
    /// once it is exhausted. The error text is truncated before storage.
    pub async fn mark_failure(
        &self,
        task: &IngestTask,
        error: &IngestFailure,
        now: DateTime<Utc>,
    ) -> Result<FailureDisposition> {
        let next_attempt = task.attempt_count.saturating_add(1);
        let message = truncate_error(&error.message);

        let (status, next_retry_at, disposition) = if self.policy.is_exhausted(next_attempt) {
            (TaskStatus::Dead, None, FailureDisposition::Dead)
        } else {
            let delay = self.policy.backoff(next_attempt);
            let due = now
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::max_value());
            (TaskStatus::Retrying, Some(due), FailureDisposition::Retry)
        };

        let mut tx = self.pool.begin().await?;

        IngestTask::record_failure(
            &mut *tx,
            task.id,
            status,
            next_attempt,
            &message,
            next_retry_at,
            now,
        )
        .await?;

        IngestTaskTransition::create(
            &mut *tx,
            &NewIngestTaskTransition {
                task_id: task.id,
                from_status: Some(task.status.clone()),
                to_status: status.to_string(),
                attempt_count: next_attempt,
                message: Some(message.clone()),
            },
            now,
        )
        .await?;

        tx.commit().await?;

        match disposition {
            FailureDisposition::Retry => {
                debug!(
                    task_id = %task.id,
                    attempt = next_attempt,
                    next_retry_at = ?next_retry_at,
                    error = %message,
                    "Task attempt failed, will retry"
                );
            }
            FailureDisposition::Dead => {
                warn!(
                    task_id = %task.id,
                    attempt = next_attempt,
                    error = %message,
                    "Task attempts exhausted, marked DEAD"
                );
            }
        }

        Ok(disposition)
    }
}
