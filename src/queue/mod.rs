pub mod memory;
pub mod postgres;

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use crate::models::{ItemOutcome, ItemStatus, ProcessingErrorRecord, WorkItem};

/// Result of an enqueue call. Re-submitting a known id is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Inserted,
    Duplicate,
}

#[derive(Debug)]
pub struct QueueError {
    pub message: String,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for QueueError {
    fn from(s: String) -> Self {
        QueueError { message: s }
    }
}

impl From<&str> for QueueError {
    fn from(s: &str) -> Self {
        QueueError {
            message: s.to_string(),
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError {
            message: format!("database error: {err}"),
        }
    }
}

/// Durable store of ingestion work items.
///
/// `select_batch` leases the items it returns; a lease is cleared by
/// `record_outcome` or `release`. Implementations must guarantee that two
/// concurrent `select_batch` calls never return the same item.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, record_id: &str) -> Result<Enqueued, QueueError>;

    /// Lease and return up to `limit` eligible items, highest retry
    /// priority first, oldest first within a priority.
    async fn select_batch(&self, limit: i64) -> Result<Vec<WorkItem>, QueueError>;

    /// Flag an item as actively being processed. Called after the breaker
    /// gate passes; items that crash mid-flight are found by
    /// `recover_interrupted`. Unknown ids are an error.
    async fn mark_started(&self, record_id: &str) -> Result<(), QueueError>;

    /// Clear an item's lease without recording an attempt. Used for items
    /// skipped by the breaker or not reached before shutdown. Unknown ids
    /// are an error.
    async fn release(&self, record_id: &str) -> Result<(), QueueError>;

    /// Apply one attempt's outcome in a single atomic update.
    async fn record_outcome(&self, record_id: &str, outcome: ItemOutcome)
        -> Result<(), QueueError>;

    async fn status_counts(&self) -> Result<BTreeMap<ItemStatus, i64>, QueueError>;

    async fn find(&self, record_id: &str) -> Result<Option<WorkItem>, QueueError>;

    /// Most recent error rows for an item, newest first.
    async fn errors_for(
        &self,
        record_id: &str,
        limit: i64,
    ) -> Result<Vec<ProcessingErrorRecord>, QueueError>;

    /// Every id the queue has ever seen, for intake deduplication.
    async fn known_ids(&self) -> Result<HashSet<String>, QueueError>;

    /// Startup pass: relabel in-flight leftovers from a crashed run as
    /// interrupted so they re-enter selection immediately. Returns the
    /// number of items recovered.
    async fn recover_interrupted(&self) -> Result<u64, QueueError>;

    /// Operator escape hatch: clear permanent failure and retry history so
    /// the item is selected again. Returns false for an unknown id.
    async fn reset(&self, record_id: &str) -> Result<bool, QueueError>;
}
