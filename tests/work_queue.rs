mod common;

use std::time::Duration;

use siphon::config::RetrySettings;
use siphon::models::{ErrorKind, FailureKind, ItemOutcome, ItemStatus};
use siphon::queue::memory::MemoryWorkQueue;
use siphon::queue::{Enqueued, WorkQueue};

fn zero_backoff() -> RetrySettings {
    RetrySettings {
        max_attempts: 5,
        backoff_base: Duration::ZERO,
        backoff_multiplier: 2.0,
        backoff_cap: Duration::from_secs(86_400),
    }
}

fn queue() -> MemoryWorkQueue {
    MemoryWorkQueue::new(common::retry_settings(), Duration::from_secs(3600))
}

fn failure(kind: FailureKind) -> ItemOutcome {
    ItemOutcome::Failure {
        kind,
        error: ErrorKind::UpstreamStatus,
        message: "upstream returned status 500".to_string(),
    }
}

// ── Enqueue ─────────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_is_idempotent() {
    let queue = queue();

    assert!(matches!(
        queue.enqueue("r1").await.unwrap(),
        Enqueued::Inserted
    ));
    assert!(matches!(
        queue.enqueue("r1").await.unwrap(),
        Enqueued::Duplicate
    ));

    assert_eq!(queue.known_ids().await.unwrap().len(), 1);
    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempt_count, 0);
}

// ── Selection order ─────────────────────────────────────────────

#[tokio::test]
async fn selection_orders_by_retry_priority() {
    let queue = MemoryWorkQueue::new(zero_backoff(), Duration::from_secs(3600));

    // Enqueued first, but pending has the lowest priority.
    for id in ["p1", "r-failed", "r-partial", "r-upstream", "r-interrupted"] {
        queue.enqueue(id).await.unwrap();
    }
    queue
        .record_outcome("r-failed", failure(FailureKind::Failed))
        .await
        .unwrap();
    queue
        .record_outcome("r-partial", failure(FailureKind::Partial))
        .await
        .unwrap();
    queue
        .record_outcome("r-upstream", failure(FailureKind::UpstreamError))
        .await
        .unwrap();
    queue
        .record_outcome("r-interrupted", ItemOutcome::Interrupted)
        .await
        .unwrap();

    let batch = queue.select_batch(10).await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|item| item.record_id.as_str()).collect();
    assert_eq!(
        ids,
        ["r-failed", "r-interrupted", "r-partial", "r-upstream", "p1"]
    );
}

#[tokio::test]
async fn selection_respects_limit_and_enqueue_order() {
    let queue = queue();
    for id in ["a", "b", "c"] {
        queue.enqueue(id).await.unwrap();
    }

    let batch = queue.select_batch(2).await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|item| item.record_id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
}

#[tokio::test]
async fn future_next_attempt_is_not_selected() {
    let queue = queue();
    queue.enqueue("r1").await.unwrap();
    queue
        .record_outcome("r1", failure(FailureKind::Failed))
        .await
        .unwrap();

    // Default backoff pushes the next attempt well into the future.
    assert!(queue.select_batch(10).await.unwrap().is_empty());

    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.next_attempt_at.is_some());
}

// ── Leases ──────────────────────────────────────────────────────

#[tokio::test]
async fn leased_items_are_skipped() {
    let queue = queue();
    queue.enqueue("r1").await.unwrap();

    let first = queue.select_batch(10).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].processing_started_at.is_some());

    assert!(queue.select_batch(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_leases_are_reclaimed() {
    let queue = MemoryWorkQueue::new(common::retry_settings(), Duration::ZERO);
    queue.enqueue("r1").await.unwrap();

    assert_eq!(queue.select_batch(10).await.unwrap().len(), 1);
    // Zero-length leases expire the moment they are stamped.
    assert_eq!(queue.select_batch(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_selects_claim_disjoint_items() {
    let queue = std::sync::Arc::new(queue());
    queue.enqueue("a").await.unwrap();
    queue.enqueue("b").await.unwrap();

    let (first, second) = tokio::join!(queue.select_batch(1), queue.select_batch(1));
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first[0].record_id, second[0].record_id);
}

#[tokio::test]
async fn release_clears_lease_and_keeps_status() {
    let queue = queue();
    queue.enqueue("r1").await.unwrap();

    queue.select_batch(1).await.unwrap();
    queue.mark_started("r1").await.unwrap();
    queue.release("r1").await.unwrap();

    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::InFlight);
    assert!(item.processing_started_at.is_none());

    // Released in-flight items are immediately selectable again.
    assert_eq!(queue.select_batch(10).await.unwrap().len(), 1);
}

// ── Outcomes ────────────────────────────────────────────────────

#[tokio::test]
async fn success_is_terminal() {
    let queue = queue();
    queue.enqueue("r1").await.unwrap();
    queue.select_batch(1).await.unwrap();
    queue.mark_started("r1").await.unwrap();

    queue.record_outcome("r1", ItemOutcome::Success).await.unwrap();

    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Complete);
    assert!(item.completed_at.is_some());
    assert!(item.processing_started_at.is_none());

    assert!(queue.select_batch(10).await.unwrap().is_empty());
    assert!(queue.errors_for("r1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn interruption_consumes_no_attempt() {
    let queue = queue();
    queue.enqueue("r1").await.unwrap();
    queue.select_batch(1).await.unwrap();
    queue.mark_started("r1").await.unwrap();

    queue
        .record_outcome("r1", ItemOutcome::Interrupted)
        .await
        .unwrap();

    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Interrupted);
    assert_eq!(item.attempt_count, 0);
    assert!(item.next_attempt_at.is_none());
    assert!(queue.errors_for("r1", 10).await.unwrap().is_empty());

    // No backoff either: the item is selectable right away.
    assert_eq!(queue.select_batch(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_items_are_parked() {
    let queue = MemoryWorkQueue::new(
        RetrySettings {
            max_attempts: 2,
            backoff_base: Duration::ZERO,
            backoff_multiplier: 2.0,
            backoff_cap: Duration::from_secs(86_400),
        },
        Duration::from_secs(3600),
    );
    queue.enqueue("r1").await.unwrap();

    queue
        .record_outcome("r1", failure(FailureKind::UpstreamError))
        .await
        .unwrap();
    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::UpstreamError);
    assert_eq!(item.attempt_count, 1);
    assert!(!item.permanently_failed);

    queue
        .record_outcome("r1", failure(FailureKind::UpstreamError))
        .await
        .unwrap();
    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempt_count, 2);
    assert!(item.permanently_failed);
    assert!(item.next_attempt_at.is_none());

    assert!(queue.select_batch(10).await.unwrap().is_empty());
    assert_eq!(queue.errors_for("r1", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn error_rows_come_back_newest_first() {
    let queue = MemoryWorkQueue::new(zero_backoff(), Duration::from_secs(3600));
    queue.enqueue("r1").await.unwrap();

    queue
        .record_outcome("r1", failure(FailureKind::Failed))
        .await
        .unwrap();
    queue
        .record_outcome(
            "r1",
            ItemOutcome::Failure {
                kind: FailureKind::UpstreamError,
                error: ErrorKind::Transport,
                message: "connection refused".to_string(),
            },
        )
        .await
        .unwrap();

    let errors = queue.errors_for("r1", 10).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].attempt_number, 2);
    assert_eq!(errors[0].kind, ErrorKind::Transport);
    assert_eq!(errors[1].attempt_number, 1);

    let one = queue.errors_for("r1", 1).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].attempt_number, 2);
}

#[tokio::test]
async fn updates_for_unknown_ids_are_errors() {
    let queue = queue();
    assert!(
        queue
            .record_outcome("ghost", ItemOutcome::Success)
            .await
            .is_err()
    );
    assert!(queue.mark_started("ghost").await.is_err());
    assert!(queue.release("ghost").await.is_err());
}

// ── Recovery & reset ────────────────────────────────────────────

#[tokio::test]
async fn recover_interrupted_relabels_in_flight() {
    let queue = queue();
    for id in ["a", "b", "c"] {
        queue.enqueue(id).await.unwrap();
    }
    queue.select_batch(10).await.unwrap();
    queue.mark_started("a").await.unwrap();
    queue.mark_started("b").await.unwrap();
    queue.record_outcome("c", ItemOutcome::Success).await.unwrap();

    assert_eq!(queue.recover_interrupted().await.unwrap(), 2);

    for id in ["a", "b"] {
        let item = queue.find(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Interrupted);
        assert!(item.processing_started_at.is_none());
    }
    let done = queue.find("c").await.unwrap().unwrap();
    assert_eq!(done.status, ItemStatus::Complete);
}

#[tokio::test]
async fn reset_revives_a_parked_item() {
    let queue = MemoryWorkQueue::new(
        RetrySettings {
            max_attempts: 1,
            backoff_base: Duration::ZERO,
            backoff_multiplier: 2.0,
            backoff_cap: Duration::from_secs(86_400),
        },
        Duration::from_secs(3600),
    );
    queue.enqueue("r1").await.unwrap();
    queue
        .record_outcome("r1", failure(FailureKind::Failed))
        .await
        .unwrap();
    assert!(queue.find("r1").await.unwrap().unwrap().permanently_failed);

    assert!(queue.reset("r1").await.unwrap());
    let item = queue.find("r1").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempt_count, 0);
    assert!(!item.permanently_failed);
    assert!(item.last_error.is_none());

    assert_eq!(queue.select_batch(10).await.unwrap().len(), 1);

    // Error history survives the reset.
    assert_eq!(queue.errors_for("r1", 10).await.unwrap().len(), 1);

    assert!(!queue.reset("ghost").await.unwrap());
}

// ── Counts ──────────────────────────────────────────────────────

#[tokio::test]
async fn status_counts_group_items() {
    let queue = queue();
    for id in ["a", "b", "c"] {
        queue.enqueue(id).await.unwrap();
    }
    queue.record_outcome("a", ItemOutcome::Success).await.unwrap();

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&ItemStatus::Complete), Some(&1));
    assert_eq!(counts.get(&ItemStatus::Pending), Some(&2));
    assert_eq!(counts.get(&ItemStatus::Failed), None);
}
