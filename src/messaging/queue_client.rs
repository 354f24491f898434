//! # Ingest Queue Client
//!
//! pgmq-backed queue client providing the transport capability the
//! pipeline needs: ack-required delivery with visibility timeouts, plus
//! idle-time listing and atomic claiming of pending (delivered but
//! unacknowledged) entries for crash recovery.
//!
//! Reads go through the pgmq crate. The pending/claim operations are
//! guarded SQL against the queue table itself: a claim is a conditional
//! `UPDATE ... WHERE vt <= ...` whose affected rows are the entries this
//! caller won, so a given pending entry is claimed by at most one caller.

use pgmq::{types::Message, PGMQueue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};

use super::errors::MessagingError;

/// A delivered-but-unacknowledged entry, as seen by the reclaim sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDelivery {
    /// Queue-assigned delivery id
    pub delivery_id: i64,
    /// Delivery attempts so far (1 = delivered once, never reclaimed)
    pub delivery_count: i32,
    /// Elapsed time since the last delivery attempt, in milliseconds
    pub idle_ms: i64,
    /// Business payload
    pub message: Value,
}

/// A pending entry won by a claim call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedDelivery {
    pub delivery_id: i64,
    pub message: Value,
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    msg_id: i64,
    read_ct: i32,
    idle_ms: i64,
    message: Value,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    msg_id: i64,
    message: Value,
}

/// pgmq-based queue client.
#[derive(Debug, Clone)]
pub struct IngestQueueClient {
    pgmq: PGMQueue,
}

impl IngestQueueClient {
    /// Create a new client from a connection string.
    pub async fn new(database_url: &str) -> Result<Self, MessagingError> {
        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::database_query("connect", e.to_string()))?;
        info!("Connected ingest queue client");
        Ok(Self { pgmq })
    }

    /// Create a new client sharing an existing connection pool.
    pub async fn new_with_pool(pool: PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }

    /// Underlying connection pool, for the guarded pending/claim SQL.
    pub fn pool(&self) -> &PgPool {
        &self.pgmq.connection
    }

    /// Create the queue if it doesn't exist. Creation is idempotent, so
    /// concurrent workers racing at startup all succeed.
    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        validate_queue_name(queue_name)?;
        self.pgmq.create(queue_name).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "create", e.to_string())
        })?;
        debug!(queue = queue_name, "Queue ensured");
        Ok(())
    }

    /// Send a JSON payload, returning the delivery id.
    pub async fn send(&self, queue_name: &str, payload: &Value) -> Result<i64, MessagingError> {
        let delivery_id = self.pgmq.send(queue_name, payload).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "send", e.to_string())
        })?;
        debug!(queue = queue_name, delivery_id, "Message sent");
        Ok(delivery_id)
    }

    /// Read a batch of visible messages, making each invisible for
    /// `visibility_timeout_seconds`. An unacked delivery becomes
    /// reclaim-eligible once that window lapses.
    pub async fn read_batch(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: u32,
        limit: i32,
    ) -> Result<Vec<Message<Value>>, MessagingError> {
        let messages = self
            .pgmq
            .read_batch::<Value>(queue_name, Some(visibility_timeout_seconds as i32), limit)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read_batch", e.to_string()))?
            .unwrap_or_default();
        Ok(messages)
    }

    /// Acknowledge a delivery, removing it from the queue.
    pub async fn ack(&self, queue_name: &str, delivery_id: i64) -> Result<(), MessagingError> {
        self.pgmq.delete(queue_name, delivery_id).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "ack", e.to_string())
        })?;
        debug!(queue = queue_name, delivery_id, "Delivery acknowledged");
        Ok(())
    }

    /// List up to `limit` pending entries: delivered at least once and not
    /// yet acknowledged. `idle_ms` is the elapsed time since the last
    /// delivery attempt, derived from the entry's visibility deadline.
    pub async fn list_pending(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: u32,
        limit: i64,
    ) -> Result<Vec<PendingDelivery>, MessagingError> {
        validate_queue_name(queue_name)?;
        let query = format!(
            r#"
            SELECT msg_id, read_ct,
                   GREATEST(
                       (EXTRACT(EPOCH FROM (now() - (vt - make_interval(secs => $1)))) * 1000.0)::BIGINT,
                       0
                   ) AS idle_ms,
                   message
            FROM pgmq.q_{queue_name}
            WHERE read_ct > 0
            ORDER BY msg_id ASC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, PendingRow>(&query)
            .bind(f64::from(visibility_timeout_seconds))
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(|e| {
                MessagingError::database_query("list_pending", e.to_string())
            })?;

        Ok(rows
            .into_iter()
            .map(|row| PendingDelivery {
                delivery_id: row.msg_id,
                delivery_count: row.read_ct,
                idle_ms: row.idle_ms,
                message: row.message,
            })
            .collect())
    }

    /// Atomically claim pending entries that have been idle at least
    /// `min_idle_ms` since their last delivery. The claim is a
    /// version-checked compare-and-swap on the delivery count: of several
    /// concurrent claimants at most one wins each entry. Winners get the
    /// entry redelivered with a fresh visibility window.
    pub async fn claim_pending(
        &self,
        queue_name: &str,
        candidates: &[PendingDelivery],
        visibility_timeout_seconds: u32,
        min_idle_ms: u64,
    ) -> Result<Vec<ClaimedDelivery>, MessagingError> {
        validate_queue_name(queue_name)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let delivery_ids: Vec<i64> = candidates.iter().map(|c| c.delivery_id).collect();
        let delivery_counts: Vec<i32> = candidates.iter().map(|c| c.delivery_count).collect();

        let query = format!(
            r#"
            UPDATE pgmq.q_{queue_name} AS q
            SET vt = now() + make_interval(secs => $3),
                read_ct = q.read_ct + 1
            FROM unnest($1::bigint[], $2::int[]) AS candidate(msg_id, read_ct)
            WHERE q.msg_id = candidate.msg_id
              AND q.read_ct = candidate.read_ct
              AND (q.vt - make_interval(secs => $3)) + make_interval(secs => $4) <= now()
            RETURNING q.msg_id, q.message
            "#
        );

        let rows = sqlx::query_as::<_, ClaimedRow>(&query)
            .bind(&delivery_ids)
            .bind(&delivery_counts)
            .bind(f64::from(visibility_timeout_seconds))
            .bind(min_idle_ms as f64 / 1000.0)
            .fetch_all(self.pool())
            .await
            .map_err(|e| {
                MessagingError::database_query("claim_pending", e.to_string())
            })?;

        if !rows.is_empty() {
            debug!(
                queue = queue_name,
                claimed = rows.len(),
                "Claimed idle pending deliveries"
            );
        }

        Ok(rows
            .into_iter()
            .map(|row| ClaimedDelivery {
                delivery_id: row.msg_id,
                message: row.message,
            })
            .collect())
    }

    /// Drop a queue completely.
    pub async fn drop_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.pgmq.destroy(queue_name).await.map_err(|e| {
            MessagingError::queue_operation(queue_name, "destroy", e.to_string())
        })?;
        Ok(())
    }
}

/// Queue names are interpolated into SQL identifiers; restrict them to the
/// character set pgmq itself allows.
fn validate_queue_name(queue_name: &str) -> Result<(), MessagingError> {
    if queue_name.is_empty() || queue_name.len() > 47 {
        return Err(MessagingError::InvalidQueueName {
            queue_name: queue_name.to_string(),
            reason: "must be 1-47 characters".to_string(),
        });
    }
    if !queue_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(MessagingError::InvalidQueueName {
            queue_name: queue_name.to_string(),
            reason: "only lowercase alphanumerics and underscores allowed".to_string(),
        });
    }
    if queue_name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(MessagingError::InvalidQueueName {
            queue_name: queue_name.to_string(),
            reason: "must not start with a digit".to_string(),
        });
    }
    Ok(())
}
