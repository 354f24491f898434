//! # Ingest Task Model
//!
//! One durable row per document-ingestion job. The row is the shared
//! resource every pipeline component coordinates on; its only
//! mutual-exclusion primitive is [`IngestTask::try_mark_running`], a
//! guarded conditional UPDATE whose affected-row count signals ownership.
//!
//! ## Database Schema
//!
//! Maps to the `ingest_tasks` table:
//! - `id`: Primary key (UUID), minted by the enqueue trigger
//! - `status`: QUEUED | RUNNING | RETRYING | SUCCEEDED | DEAD
//! - `attempt_count`: monotonically non-decreasing failure counter
//! - `next_retry_at`: due time while RETRYING, NULL otherwise
//!
//! SUCCEEDED and DEAD are terminal; rows are never deleted. Progress
//! fields use overwrite semantics so redelivered work is idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use uuid::Uuid;

use crate::error::{IngestCoreError, Result};

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created by the enqueue trigger, not yet picked up
    Queued,
    /// Exactly one worker owns the task
    Running,
    /// Failed with attempts remaining; due again at `next_retry_at`
    Retrying,
    /// Terminal success
    Succeeded,
    /// Terminal failure, attempts exhausted
    Dead,
}

impl TaskStatus {
    /// Terminal states are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Succeeded => "SUCCEEDED",
            Self::Dead => "DEAD",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = IngestCoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "RETRYING" => Ok(Self::Retrying),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "DEAD" => Ok(Self::Dead),
            other => Err(IngestCoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A document-ingestion task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IngestTask {
    pub id: Uuid,
    pub user_id: i64,
    pub document_id: i64,
    pub status: String,
    pub progress: i32,
    pub processed_segments: i32,
    pub total_segments: i32,
    pub file_path: String,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// User-facing failure description, mirrored from `last_error`
    pub error_message: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New task for creation (status starts QUEUED with zeroed counters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIngestTask {
    pub id: Uuid,
    pub user_id: i64,
    pub document_id: i64,
    pub file_path: String,
}

/// Read snapshot served to status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestTaskSnapshot {
    pub task_id: Uuid,
    pub document_id: i64,
    pub status: String,
    pub progress: i32,
    pub processed_segments: i32,
    pub total_segments: i32,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IngestTask {
    /// Parse the stored status string.
    pub fn parsed_status(&self) -> Result<TaskStatus> {
        self.status.parse()
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.parsed_status().map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// Create a new QUEUED task row.
    pub async fn create<'e, E>(executor: E, new_task: &NewIngestTask) -> Result<IngestTask>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, IngestTask>(
            r#"
            INSERT INTO ingest_tasks (
                id, user_id, document_id, status, progress, processed_segments,
                total_segments, file_path, attempt_count, next_retry_at,
                error_message, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, 'QUEUED', 0, 0, 0, $4, 0, NULL, NULL, NULL, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_task.id)
        .bind(new_task.user_id)
        .bind(new_task.document_id)
        .bind(&new_task.file_path)
        .fetch_one(executor)
        .await?;

        Ok(task)
    }

    /// Find a task by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<IngestTask>> {
        let task = sqlx::query_as::<_, IngestTask>("SELECT * FROM ingest_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(task)
    }

    /// Find a task scoped to its owning user (status polling path).
    pub async fn find_by_id_for_user(
        pool: &PgPool,
        id: Uuid,
        user_id: i64,
    ) -> Result<Option<IngestTask>> {
        let task = sqlx::query_as::<_, IngestTask>(
            "SELECT * FROM ingest_tasks WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(task)
    }

    /// The ownership gate: atomically transition QUEUED/RETRYING -> RUNNING
    /// if and only if the stored status is still eligible and the task is
    /// due. Returns true when this caller won the row. Must stay a single
    /// guarded UPDATE; it is the sole mutual-exclusion primitive shared by
    /// the stream worker and the reclaimer. The due time is cleared on the
    /// way in; it only exists while RETRYING.
    pub async fn try_mark_running<'e, E>(executor: E, id: Uuid, now: DateTime<Utc>) -> Result<bool>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE ingest_tasks
            SET status = 'RUNNING', next_retry_at = NULL, updated_at = $2
            WHERE id = $1
              AND status IN ('QUEUED', 'RETRYING')
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal success: full progress, retry bookkeeping cleared.
    pub async fn mark_succeeded<'e, E>(executor: E, id: Uuid, now: DateTime<Utc>) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE ingest_tasks
            SET status = 'SUCCEEDED', progress = 100, next_retry_at = NULL,
                error_message = NULL, last_error = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: RETRYING with a due time, or DEAD when
    /// `next_retry_at` is None. The truncated message lands in both the
    /// user-facing `error_message` and the diagnostic `last_error`.
    pub async fn record_failure<'e, E>(
        executor: E,
        id: Uuid,
        status: TaskStatus,
        attempt_count: i32,
        error_message: &str,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE ingest_tasks
            SET status = $2, attempt_count = $3, error_message = $4,
                last_error = $4, next_retry_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(attempt_count)
        .bind(error_message)
        .bind(next_retry_at)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Overwrite progress counters. Called from the throttled progress
    /// sink; overwrite semantics keep redelivery idempotent.
    pub async fn update_progress(
        pool: &PgPool,
        id: Uuid,
        processed_segments: i32,
        total_segments: i32,
        progress: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_tasks
            SET processed_segments = $2, total_segments = $3, progress = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(processed_segments)
        .bind(total_segments)
        .bind(progress)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Project the row into the read snapshot.
    pub fn snapshot(&self) -> IngestTaskSnapshot {
        IngestTaskSnapshot {
            task_id: self.id,
            document_id: self.document_id,
            status: self.status.clone(),
            progress: self.progress,
            processed_segments: self.processed_segments,
            total_segments: self.total_segments,
            attempt_count: self.attempt_count,
            next_retry_at: self.next_retry_at,
            error_message: self.error_message.clone(),
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}
