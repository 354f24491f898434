//! # Ingest Task Transition Model
//!
//! Append-only audit trail: one row per state transition, written in the
//! same transaction as the task mutation it records. Rows are never
//! updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IngestTaskTransition {
    pub id: i64,
    pub task_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub attempt_count: i32,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIngestTaskTransition {
    pub task_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub attempt_count: i32,
    pub message: Option<String>,
}

impl IngestTaskTransition {
    /// Append a transition row.
    pub async fn create<'e, E>(
        executor: E,
        new_transition: &NewIngestTaskTransition,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO ingest_task_transitions (
                task_id, from_status, to_status, attempt_count, message, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(new_transition.task_id)
        .bind(&new_transition.from_status)
        .bind(&new_transition.to_status)
        .bind(new_transition.attempt_count)
        .bind(&new_transition.message)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Full transition history for a task, oldest first.
    pub async fn list_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<IngestTaskTransition>> {
        let transitions = sqlx::query_as::<_, IngestTaskTransition>(
            r#"
            SELECT * FROM ingest_task_transitions
            WHERE task_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(transitions)
    }
}
