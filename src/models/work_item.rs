use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::processing_error::ErrorKind;

/// Lifecycle status of a work item. Maps to the Postgres `item_status`
/// enum type, so stray strings never reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Complete,
    Failed,
    Partial,
    Interrupted,
    UpstreamError,
}

impl ItemStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Interrupted => "interrupted",
            Self::UpstreamError => "upstream_error",
        }
    }

    /// Completed items never re-enter the queue.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Selection priority: previously-started work drains before fresh
    /// intake competes for the same rate-limited capacity. Lower is sooner.
    pub const fn retry_priority(self) -> i32 {
        match self {
            Self::Failed => 1,
            Self::Interrupted | Self::InFlight => 2,
            Self::Partial => 3,
            Self::UpstreamError => 4,
            Self::Pending => 5,
            Self::Complete => 6,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WorkItem {
    pub record_id: String,
    pub status: ItemStatus,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub permanently_failed: bool,
    pub last_error: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Failure classification carried into `record_outcome`. Decides which
/// status the item waits in until its next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UpstreamError,
    Failed,
    Partial,
}

impl FailureKind {
    pub const fn status(self) -> ItemStatus {
        match self {
            Self::UpstreamError => ItemStatus::UpstreamError,
            Self::Failed => ItemStatus::Failed,
            Self::Partial => ItemStatus::Partial,
        }
    }
}

/// Result of one processing attempt, as recorded against the queue.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Success,
    Failure {
        kind: FailureKind,
        error: ErrorKind,
        message: String,
    },
    /// Shutdown cut processing short. Not a failed attempt: no counter
    /// increment, no backoff, no error row.
    Interrupted,
}
