use chrono::{DateTime, Utc};
use serde::Serialize;

/// Download state of one attachment. Maps to the Postgres
/// `attachment_state` enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "attachment_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttachmentState {
    Pending,
    Validated,
    ValidationFailed,
    Failed,
}

impl AttachmentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::ValidationFailed => "validation_failed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AttachmentRecord {
    pub record_id: String,
    pub attachment_ref: String,
    pub seq: i32,
    pub filename: Option<String>,
    pub state: AttachmentState,
    pub checksum: Option<String>,
    pub size_bytes: Option<i64>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// One attachment as advertised by a fetched record payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentSpec {
    pub attachment_ref: String,
    pub url: String,
    pub filename: Option<String>,
    pub expected_checksum: Option<String>,
    pub expected_size: Option<i64>,
}

impl AttachmentSpec {
    /// Extract the attachment list from a fetched payload. Entries without
    /// a usable URL are skipped; the URL doubles as the reference when the
    /// payload supplies neither `ref` nor `id`.
    pub fn from_payload(payload: &serde_json::Value) -> Vec<AttachmentSpec> {
        let Some(entries) = payload.get("attachments").and_then(|v| v.as_array()) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let url = entry.get("url").and_then(|v| v.as_str())?;
                let attachment_ref = entry
                    .get("ref")
                    .or_else(|| entry.get("id"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(url);

                Some(AttachmentSpec {
                    attachment_ref: attachment_ref.to_string(),
                    url: url.to_string(),
                    filename: entry
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    expected_checksum: entry
                        .get("checksum")
                        .and_then(|v| v.as_str())
                        .map(str::to_lowercase),
                    expected_size: entry.get("size").and_then(|v| v.as_i64()),
                })
            })
            .collect()
    }
}
