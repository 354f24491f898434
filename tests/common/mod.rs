//! Shared helpers for database-backed integration tests.
//!
//! Tests run against a real PostgreSQL instance with the pgmq extension
//! and skip early when `TEST_DATABASE_URL` is not provided.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use ingest_core::ingest::{DocumentIngestor, IngestFailure, ProgressSink};
use ingest_core::messaging::MessagingError;
use ingest_core::orchestration::BrokerPublisher;

/// Connect and migrate, or `None` when no test database is configured.
pub async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        println!("Skipping integration test - no TEST_DATABASE_URL provided");
        return None;
    };

    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    Some(pool)
}

/// A queue name unique to one test run, within pgmq's naming rules.
pub fn unique_queue(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &suffix[..12])
}

/// Ingestor scripted to fail a fixed number of times, then succeed while
/// reporting segment progress.
pub struct ScriptedIngestor {
    failures_remaining: AtomicUsize,
    total_segments: i32,
}

impl ScriptedIngestor {
    pub fn succeeding(total_segments: i32) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(0),
            total_segments,
        }
    }

    pub fn failing_times(failures: usize, total_segments: i32) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
            total_segments,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_times(usize::MAX, 0)
    }
}

#[async_trait]
impl DocumentIngestor for ScriptedIngestor {
    async fn ingest(
        &self,
        _user_id: i64,
        _document_id: i64,
        _file_path: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), IngestFailure> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(IngestFailure::new("simulated ingest failure"));
        }

        for processed in 1..=self.total_segments {
            progress.report(processed, self.total_segments).await;
        }
        Ok(())
    }
}

/// Broker that records every publish and optionally rejects them all.
pub struct RecordingBroker {
    pub published: parking_lot::Mutex<Vec<(String, String, String)>>,
    reject: bool,
}

impl RecordingBroker {
    pub fn accepting() -> Self {
        Self {
            published: parking_lot::Mutex::new(Vec::new()),
            reject: false,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            published: parking_lot::Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn published_keys(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|(_, key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerPublisher for RecordingBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), MessagingError> {
        if self.reject {
            return Err(MessagingError::publish_failed(topic, "broker unavailable"));
        }
        self.published
            .lock()
            .push((topic.to_string(), key.to_string(), payload.to_string()));
        Ok(())
    }
}
