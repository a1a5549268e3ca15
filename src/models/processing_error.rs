use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Error classification for the audit trail. Only informs logging and
/// operator queries; retry behavior does not branch on it. Maps to the
/// Postgres `error_kind` enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    UpstreamStatus,
    RateLimited,
    Persistence,
    Validation,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::UpstreamStatus => "upstream_status",
            Self::RateLimited => "rate_limited",
            Self::Persistence => "persistence",
            Self::Validation => "validation",
        }
    }
}

/// Append-only record of one failed attempt. Never mutated or deleted by
/// the engine; retention is an operator concern.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProcessingErrorRecord {
    pub id: Uuid,
    pub record_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempt_number: i32,
    pub occurred_at: DateTime<Utc>,
}
