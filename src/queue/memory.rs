use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RetrySettings;
use crate::models::{ItemOutcome, ItemStatus, ProcessingErrorRecord, WorkItem};
use crate::retry;

use super::{Enqueued, QueueError, WorkQueue};

/// In-memory queue with the same semantics as the Postgres store. Backs
/// the test suite and database-free ephemeral runs.
pub struct MemoryWorkQueue {
    inner: Mutex<Inner>,
    retry: RetrySettings,
    lease_duration: Duration,
}

struct Inner {
    items: BTreeMap<String, WorkItem>,
    errors: Vec<ProcessingErrorRecord>,
}

impl MemoryWorkQueue {
    pub fn new(retry: RetrySettings, lease_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                errors: Vec::new(),
            }),
            retry,
            lease_duration,
        }
    }

    fn lease_expired(&self, started: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let lease = chrono::Duration::milliseconds(self.lease_duration.as_millis() as i64);
        started + lease <= now
    }

    fn eligible(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        if item.permanently_failed {
            return false;
        }
        if let Some(started) = item.processing_started_at {
            if !self.lease_expired(started, now) {
                return false;
            }
        }
        match item.status {
            ItemStatus::Pending => true,
            ItemStatus::Complete => false,
            ItemStatus::Failed
            | ItemStatus::Interrupted
            | ItemStatus::Partial
            | ItemStatus::UpstreamError
            | ItemStatus::InFlight => {
                item.attempt_count < self.retry.max_attempts
                    && item.next_attempt_at.is_none_or(|at| at <= now)
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, record_id: &str) -> Result<Enqueued, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.items.contains_key(record_id) {
            return Ok(Enqueued::Duplicate);
        }

        let now = Utc::now();
        inner.items.insert(
            record_id.to_string(),
            WorkItem {
                record_id: record_id.to_string(),
                status: ItemStatus::Pending,
                attempt_count: 0,
                next_attempt_at: None,
                permanently_failed: false,
                last_error: None,
                processing_started_at: None,
                enqueued_at: now,
                updated_at: now,
                completed_at: None,
            },
        );
        Ok(Enqueued::Inserted)
    }

    async fn select_batch(&self, limit: i64) -> Result<Vec<WorkItem>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let mut picked: Vec<String> = inner
            .items
            .values()
            .filter(|item| self.eligible(item, now))
            .map(|item| item.record_id.clone())
            .collect();

        picked.sort_by_key(|id| {
            let item = &inner.items[id];
            (item.status.retry_priority(), item.enqueued_at)
        });
        picked.truncate(limit.max(0) as usize);

        let mut batch = Vec::with_capacity(picked.len());
        for id in picked {
            if let Some(item) = inner.items.get_mut(&id) {
                item.processing_started_at = Some(now);
                item.updated_at = now;
                batch.push(item.clone());
            }
        }
        Ok(batch)
    }

    async fn mark_started(&self, record_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.items.get_mut(record_id) {
            Some(item) => {
                item.status = ItemStatus::InFlight;
                item.updated_at = Utc::now();
                Ok(())
            }
            None => Err(QueueError::from(format!("unknown record id: {record_id}"))),
        }
    }

    async fn release(&self, record_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.items.get_mut(record_id) {
            Some(item) => {
                item.processing_started_at = None;
                item.updated_at = Utc::now();
                Ok(())
            }
            None => Err(QueueError::from(format!("unknown record id: {record_id}"))),
        }
    }

    async fn record_outcome(
        &self,
        record_id: &str,
        outcome: ItemOutcome,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let Some(item) = inner.items.get_mut(record_id) else {
            return Err(QueueError::from(format!("unknown record id: {record_id}")));
        };

        match outcome {
            ItemOutcome::Success => {
                item.status = ItemStatus::Complete;
                item.completed_at = Some(now);
                item.last_error = None;
                item.processing_started_at = None;
                item.updated_at = now;
            }
            ItemOutcome::Interrupted => {
                item.status = ItemStatus::Interrupted;
                item.processing_started_at = None;
                item.updated_at = now;
            }
            ItemOutcome::Failure {
                kind,
                error,
                message,
            } => {
                item.attempt_count += 1;
                if retry::is_exhausted(item.attempt_count, self.retry.max_attempts) {
                    item.status = ItemStatus::Failed;
                    item.permanently_failed = true;
                    item.next_attempt_at = None;
                } else {
                    let backoff = retry::compute_backoff(
                        item.attempt_count,
                        self.retry.backoff_base,
                        self.retry.backoff_multiplier,
                        self.retry.backoff_cap,
                    );
                    item.status = kind.status();
                    item.next_attempt_at = Some(retry::next_attempt_time(now, backoff));
                }
                item.last_error = Some(message.clone());
                item.processing_started_at = None;
                item.updated_at = now;

                let attempt_number = item.attempt_count;
                inner.errors.push(ProcessingErrorRecord {
                    id: Uuid::now_v7(),
                    record_id: record_id.to_string(),
                    kind: error,
                    message,
                    attempt_number,
                    occurred_at: now,
                });
            }
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<BTreeMap<ItemStatus, i64>, QueueError> {
        let inner = self.inner.lock().await;
        let mut counts = BTreeMap::new();
        for item in inner.items.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find(&self, record_id: &str) -> Result<Option<WorkItem>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.items.get(record_id).cloned())
    }

    async fn errors_for(
        &self,
        record_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessingErrorRecord>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .errors
            .iter()
            .rev()
            .filter(|row| row.record_id == record_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn known_ids(&self) -> Result<HashSet<String>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.items.keys().cloned().collect())
    }

    async fn recover_interrupted(&self) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut recovered = 0;
        for item in inner.items.values_mut() {
            if item.status == ItemStatus::InFlight {
                item.status = ItemStatus::Interrupted;
                item.processing_started_at = None;
                item.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn reset(&self, record_id: &str) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.items.get_mut(record_id) {
            Some(item) => {
                item.permanently_failed = false;
                item.status = ItemStatus::Pending;
                item.attempt_count = 0;
                item.next_attempt_at = None;
                item.last_error = None;
                item.processing_started_at = None;
                item.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
