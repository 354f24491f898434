//! State service integration tests: the ownership gate, retry
//! scheduling, exhaustion, and the transition audit log.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use std::sync::Arc;

use ingest_core::ingest::IngestFailure;
use ingest_core::models::{IngestTask, IngestTaskTransition, NewIngestTask};
use ingest_core::orchestration::{
    FailureDisposition, IngestTaskProcessor, IngestTaskStateService, ProcessingOutcome,
    RetryPolicy,
};

async fn create_task(pool: &PgPool) -> IngestTask {
    IngestTask::create(
        pool,
        &NewIngestTask {
            id: Uuid::new_v4(),
            user_id: 1,
            document_id: 100,
            file_path: "/data/uploads/doc.pdf".to_string(),
        },
    )
    .await
    .unwrap()
}

fn service(pool: &PgPool, max_attempts: i32, base_ms: u64) -> IngestTaskStateService {
    IngestTaskStateService::new(
        pool.clone(),
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(600_000),
        ),
    )
}

#[tokio::test]
async fn test_ownership_gate_admits_exactly_one_winner() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 1_000);
    let now = Utc::now();

    let (a, b) = tokio::join!(
        service.try_mark_running(&task, now),
        service.try_mark_running(&task, now)
    );
    let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "exactly one concurrent caller must win the gate");

    let stored = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "RUNNING");
}

#[tokio::test]
async fn test_gate_refuses_task_that_is_not_due() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 60_000);

    // One failure schedules a retry a minute out.
    let disposition = service
        .mark_failure(&task, &IngestFailure::new("transient"), Utc::now())
        .await
        .unwrap();
    assert_eq!(disposition, FailureDisposition::Retry);

    let retrying = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(retrying.status, "RETRYING");
    let won = service.try_mark_running(&retrying, Utc::now()).await.unwrap();
    assert!(!won, "not-due task must not be claimable");

    // Once the due time passes the gate opens.
    let later = retrying.next_retry_at.unwrap() + ChronoDuration::seconds(1);
    let won = service.try_mark_running(&retrying, later).await.unwrap();
    assert!(won);

    // A due time only exists while RETRYING; claiming clears it.
    let claimed = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, "RUNNING");
    assert!(claimed.next_retry_at.is_none());
}

#[tokio::test]
async fn test_failures_increment_attempts_and_schedule_backoff() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 1_000);
    let now = Utc::now();

    service
        .mark_failure(&task, &IngestFailure::new("first failure"), now)
        .await
        .unwrap();

    let stored = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "RETRYING");
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("first failure"));
    // The user-facing message mirrors the diagnostic one.
    assert_eq!(stored.error_message.as_deref(), Some("first failure"));
    let due = stored.next_retry_at.unwrap();
    assert_eq!((due - now).num_milliseconds(), 1_000);

    service
        .mark_failure(&stored, &IngestFailure::new("second failure"), now)
        .await
        .unwrap();
    let stored = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 2);
    assert_eq!(
        (stored.next_retry_at.unwrap() - now).num_milliseconds(),
        2_000
    );
}

#[tokio::test]
async fn test_exhausted_budget_goes_dead_with_no_due_time() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 2, 0);

    let first = service
        .mark_failure(&task, &IngestFailure::new("boom"), Utc::now())
        .await
        .unwrap();
    assert_eq!(first, FailureDisposition::Retry);

    let stored = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    let second = service
        .mark_failure(&stored, &IngestFailure::new("boom again"), Utc::now())
        .await
        .unwrap();
    assert_eq!(second, FailureDisposition::Dead);

    let dead = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(dead.status, "DEAD");
    assert_eq!(dead.attempt_count, 2);
    assert!(dead.next_retry_at.is_none());
    assert!(dead.is_terminal());
}

#[tokio::test]
async fn test_success_sets_full_progress_and_clears_retry_fields() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 1_000);

    assert!(service.try_mark_running(&task, Utc::now()).await.unwrap());
    service.mark_succeeded(&task, Utc::now()).await.unwrap();

    let stored = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "SUCCEEDED");
    assert_eq!(stored.progress, 100);
    assert!(stored.next_retry_at.is_none());
    assert!(stored.error_message.is_none());
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn test_every_transition_is_audited() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 0);

    assert!(service.try_mark_running(&task, Utc::now()).await.unwrap());
    let running = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    service
        .mark_failure(&running, &IngestFailure::new("transient"), Utc::now())
        .await
        .unwrap();

    let transitions = IngestTaskTransition::list_for_task(&pool, task.id)
        .await
        .unwrap();
    let path: Vec<&str> = transitions.iter().map(|t| t.to_status.as_str()).collect();
    assert_eq!(path, vec!["RUNNING", "RETRYING"]);
    assert_eq!(transitions[1].message.as_deref(), Some("transient"));
}

#[tokio::test]
async fn test_processing_a_not_due_task_mutates_nothing() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 60_000);

    // One failure a minute before the task is due again.
    service
        .mark_failure(&task, &IngestFailure::new("transient"), chrono::Utc::now())
        .await
        .unwrap();
    let before = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();

    let processor = IngestTaskProcessor::new(
        pool.clone(),
        Arc::new(service),
        Arc::new(common::ScriptedIngestor::succeeding(1)),
    );
    let outcome = processor
        .process(task.id, task.user_id, task.document_id, &task.file_path)
        .await
        .unwrap();
    assert_eq!(outcome, ProcessingOutcome::NotDue);
    assert!(!outcome.should_ack());

    let after = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(after, before, "a not-due task must be left untouched");
    let transitions = IngestTaskTransition::list_for_task(&pool, task.id)
        .await
        .unwrap();
    assert_eq!(transitions.len(), 1, "only the original failure is logged");
}

#[tokio::test]
async fn test_stored_error_message_is_truncated() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let task = create_task(&pool).await;
    let service = service(&pool, 10, 1_000);

    let long_error = "e".repeat(5_000);
    service
        .mark_failure(&task, &IngestFailure::new(long_error), Utc::now())
        .await
        .unwrap();

    let stored = IngestTask::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.last_error.unwrap().chars().count(), 2_000);
}
