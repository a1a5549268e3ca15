use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgQueryResult;
use uuid::Uuid;

use crate::config::RetrySettings;
use crate::models::{ItemOutcome, ItemStatus, ProcessingErrorRecord, WorkItem};
use crate::retry;

use super::{Enqueued, QueueError, WorkQueue};

pub struct PgWorkQueue {
    pool: PgPool,
    retry: RetrySettings,
    lease_duration: Duration,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, retry: RetrySettings, lease_duration: Duration) -> Self {
        Self {
            pool,
            retry,
            lease_duration,
        }
    }
}

/// Reject an UPDATE that matched no row.
fn require_known(result: PgQueryResult, record_id: &str) -> Result<(), QueueError> {
    if result.rows_affected() == 0 {
        return Err(QueueError::from(format!("unknown record id: {record_id}")));
    }
    Ok(())
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn enqueue(&self, record_id: &str) -> Result<Enqueued, QueueError> {
        let result = sqlx::query(
            "INSERT INTO work_items (record_id) VALUES ($1)
             ON CONFLICT (record_id) DO NOTHING",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            Enqueued::Inserted
        } else {
            Enqueued::Duplicate
        })
    }

    /// Atomically lease a batch using SELECT FOR UPDATE SKIP LOCKED, so two
    /// processes sharing the store never pick the same row. Stale leases
    /// (older than the lease duration) are treated as free.
    async fn select_batch(&self, limit: i64) -> Result<Vec<WorkItem>, QueueError> {
        let mut items = sqlx::query_as::<_, WorkItem>(
            "UPDATE work_items
             SET processing_started_at = now(), updated_at = now()
             WHERE record_id IN (
                 SELECT record_id FROM work_items
                 WHERE permanently_failed = FALSE
                   AND (processing_started_at IS NULL
                        OR processing_started_at <= now() - make_interval(secs => $2::double precision))
                   AND (status = 'pending'
                        OR (status IN ('failed', 'interrupted', 'partial', 'upstream_error', 'in_flight')
                            AND attempt_count < $3
                            AND (next_attempt_at IS NULL OR next_attempt_at <= now())))
                 ORDER BY CASE status
                              WHEN 'failed' THEN 1
                              WHEN 'interrupted' THEN 2
                              WHEN 'in_flight' THEN 2
                              WHEN 'partial' THEN 3
                              WHEN 'upstream_error' THEN 4
                              ELSE 5
                          END,
                          enqueued_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING *",
        )
        .bind(limit)
        .bind(self.lease_duration.as_secs_f64())
        .bind(self.retry.max_attempts)
        .fetch_all(&self.pool)
        .await?;

        // UPDATE ... RETURNING loses the subquery's ordering.
        items.sort_by_key(|item| (item.status.retry_priority(), item.enqueued_at));
        Ok(items)
    }

    async fn mark_started(&self, record_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE work_items SET status = 'in_flight', updated_at = now()
             WHERE record_id = $1",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        require_known(result, record_id)
    }

    async fn release(&self, record_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE work_items SET processing_started_at = NULL, updated_at = now()
             WHERE record_id = $1",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        require_known(result, record_id)
    }

    async fn record_outcome(
        &self,
        record_id: &str,
        outcome: ItemOutcome,
    ) -> Result<(), QueueError> {
        match outcome {
            ItemOutcome::Success => {
                let result = sqlx::query(
                    "UPDATE work_items
                     SET status = 'complete', completed_at = now(), last_error = NULL,
                         processing_started_at = NULL, updated_at = now()
                     WHERE record_id = $1",
                )
                .bind(record_id)
                .execute(&self.pool)
                .await?;
                require_known(result, record_id)
            }
            ItemOutcome::Interrupted => {
                let result = sqlx::query(
                    "UPDATE work_items
                     SET status = 'interrupted', processing_started_at = NULL, updated_at = now()
                     WHERE record_id = $1",
                )
                .bind(record_id)
                .execute(&self.pool)
                .await?;
                require_known(result, record_id)
            }
            ItemOutcome::Failure {
                kind,
                error,
                message,
            } => {
                let mut tx = self.pool.begin().await?;

                let attempt_count: i32 = sqlx::query_scalar(
                    "UPDATE work_items SET attempt_count = attempt_count + 1
                     WHERE record_id = $1
                     RETURNING attempt_count",
                )
                .bind(record_id)
                .fetch_one(&mut *tx)
                .await?;

                if retry::is_exhausted(attempt_count, self.retry.max_attempts) {
                    sqlx::query(
                        "UPDATE work_items
                         SET status = 'failed', permanently_failed = TRUE, last_error = $2,
                             next_attempt_at = NULL, processing_started_at = NULL,
                             updated_at = now()
                         WHERE record_id = $1",
                    )
                    .bind(record_id)
                    .bind(&message)
                    .execute(&mut *tx)
                    .await?;
                } else {
                    let backoff = retry::compute_backoff(
                        attempt_count,
                        self.retry.backoff_base,
                        self.retry.backoff_multiplier,
                        self.retry.backoff_cap,
                    );
                    sqlx::query(
                        "UPDATE work_items
                         SET status = $2, last_error = $3,
                             next_attempt_at = now() + make_interval(secs => $4::double precision),
                             processing_started_at = NULL, updated_at = now()
                         WHERE record_id = $1",
                    )
                    .bind(record_id)
                    .bind(kind.status())
                    .bind(&message)
                    .bind(backoff.as_secs_f64())
                    .execute(&mut *tx)
                    .await?;
                }

                sqlx::query(
                    "INSERT INTO processing_errors (id, record_id, kind, message, attempt_number)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(Uuid::now_v7())
                .bind(record_id)
                .bind(error)
                .bind(&message)
                .bind(attempt_count)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(())
            }
        }
    }

    async fn status_counts(&self) -> Result<BTreeMap<ItemStatus, i64>, QueueError> {
        let rows: Vec<(ItemStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM work_items GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn find(&self, record_id: &str) -> Result<Option<WorkItem>, QueueError> {
        let item =
            sqlx::query_as::<_, WorkItem>("SELECT * FROM work_items WHERE record_id = $1")
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(item)
    }

    async fn errors_for(
        &self,
        record_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessingErrorRecord>, QueueError> {
        let rows = sqlx::query_as::<_, ProcessingErrorRecord>(
            "SELECT * FROM processing_errors WHERE record_id = $1
             ORDER BY occurred_at DESC LIMIT $2",
        )
        .bind(record_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn known_ids(&self) -> Result<HashSet<String>, QueueError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT record_id FROM work_items")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn recover_interrupted(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE work_items
             SET status = 'interrupted', processing_started_at = NULL, updated_at = now()
             WHERE status = 'in_flight'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset(&self, record_id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE work_items
             SET permanently_failed = FALSE, status = 'pending', attempt_count = 0,
                 next_attempt_at = NULL, last_error = NULL,
                 processing_started_at = NULL, updated_at = now()
             WHERE record_id = $1",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
