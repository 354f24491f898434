//! # Outbox Event Model
//!
//! Transactional-outbox rows: staged in the same commit as the task row
//! they announce, relayed later by the outbox publisher. Only the
//! publisher mutates these rows; delivery is at-least-once and downstream
//! consumers are expected to be idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use uuid::Uuid;

use crate::error::{IngestCoreError, Result};

/// Outbox event lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxEventStatus {
    /// Staged, never attempted
    New,
    /// Publish failed; due again at `next_retry_at`
    Retrying,
    /// Delivered to the broker
    Sent,
    /// Attempts exhausted
    Dead,
}

impl OutboxEventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Retrying => "RETRYING",
            Self::Sent => "SENT",
            Self::Dead => "DEAD",
        }
    }
}

impl fmt::Display for OutboxEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxEventStatus {
    type Err = IngestCoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "RETRYING" => Ok(Self::Retrying),
            "SENT" => Ok(Self::Sent),
            "DEAD" => Ok(Self::Dead),
            other => Err(IngestCoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A staged broker event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub payload: String,
    pub status: String,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub payload: String,
}

impl OutboxEvent {
    /// Stage a NEW event. Callers pass the transaction that creates the
    /// originating business row, making the dual write atomic.
    pub async fn create<'e, E>(executor: E, new_event: &NewOutboxEvent) -> Result<OutboxEvent>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let event = sqlx::query_as::<_, OutboxEvent>(
            r#"
            INSERT INTO outbox_events (
                id, topic, message_key, payload, status, attempt_count,
                created_at, sent_at, next_retry_at, last_error
            )
            VALUES ($1, $2, $3, $4, 'NEW', 0, NOW(), NULL, NULL, NULL)
            RETURNING *
            "#,
        )
        .bind(new_event.id)
        .bind(&new_event.topic)
        .bind(&new_event.message_key)
        .bind(&new_event.payload)
        .fetch_one(executor)
        .await?;

        Ok(event)
    }

    /// Find an event by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<OutboxEvent>> {
        let event = sqlx::query_as::<_, OutboxEvent>("SELECT * FROM outbox_events WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(event)
    }

    /// FIFO batch of due events: NEW with no due time, or RETRYING whose
    /// due time has passed. The fetch carries no claim; the design assumes
    /// a single active publisher instance.
    pub async fn find_due(pool: &PgPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT * FROM outbox_events
            WHERE (status = 'NEW' AND next_retry_at IS NULL)
               OR (status = 'RETRYING' AND next_retry_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(events)
    }

    /// Due batch restricted to one topic. A publisher instance is
    /// configured for a single topic and must not drain events staged for
    /// another.
    pub async fn find_due_for_topic(
        pool: &PgPool,
        topic: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT * FROM outbox_events
            WHERE topic = $1
              AND ((status = 'NEW' AND next_retry_at IS NULL)
               OR (status = 'RETRYING' AND next_retry_at <= $2))
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(topic)
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(events)
    }

    /// Publish succeeded: SENT with delivery timestamp, retry fields cleared.
    pub async fn mark_sent(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'SENT', sent_at = $2, next_retry_at = NULL, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Publish failed with attempts remaining.
    pub async fn mark_retrying(
        pool: &PgPool,
        id: Uuid,
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'RETRYING', attempt_count = $2, next_retry_at = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_retry_at)
        .bind(last_error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Attempts exhausted: terminal DEAD, due time cleared.
    pub async fn mark_dead(
        pool: &PgPool,
        id: Uuid,
        attempt_count: i32,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'DEAD', attempt_count = $2, next_retry_at = NULL, last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(last_error)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub fn parsed_status(&self) -> Result<OutboxEventStatus> {
        self.status.parse()
    }
}
