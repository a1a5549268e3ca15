pub mod memory;
pub mod postgres;

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use regex::Regex;

use crate::models::{AttachmentRecord, AttachmentSpec, AttachmentState};

#[derive(Debug)]
pub struct ArchiveError {
    pub message: String,
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for ArchiveError {
    fn from(s: String) -> Self {
        ArchiveError { message: s }
    }
}

impl From<&str> for ArchiveError {
    fn from(s: &str) -> Self {
        ArchiveError {
            message: s.to_string(),
        }
    }
}

impl From<sqlx::Error> for ArchiveError {
    fn from(err: sqlx::Error) -> Self {
        ArchiveError {
            message: format!("database error: {err}"),
        }
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError {
            message: format!("file write failed: {err}"),
        }
    }
}

/// Durable home for fetched records and their attachments. Payloads and
/// the per-attachment ledger survive restarts; the ledger is what lets a
/// resumed item skip attachments that already validated.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Insert or refresh the record payload.
    async fn upsert_record(
        &self,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ArchiveError>;

    /// Current ledger state for one attachment, if it has been seen before.
    async fn attachment_state(
        &self,
        record_id: &str,
        attachment_ref: &str,
    ) -> Result<Option<AttachmentState>, ArchiveError>;

    /// Record that a download attempt is beginning. Resets any previous
    /// failure state for the attachment.
    async fn attachment_started(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
    ) -> Result<(), ArchiveError>;

    /// Persist the downloaded bytes.
    async fn store_attachment(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
        bytes: &Bytes,
    ) -> Result<(), ArchiveError>;

    async fn attachment_validated(
        &self,
        record_id: &str,
        attachment_ref: &str,
        checksum: &str,
        size: i64,
    ) -> Result<(), ArchiveError>;

    async fn attachment_failed(
        &self,
        record_id: &str,
        attachment_ref: &str,
        state: AttachmentState,
        error: &str,
    ) -> Result<(), ArchiveError>;

    async fn attachments_for(&self, record_id: &str) -> Result<Vec<AttachmentRecord>, ArchiveError>;
}

static ILLEGAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Make a string safe for use as a filename component. Spaces survive so
/// identifiers like "TA - 00014" keep their formatting.
pub fn sanitize_filename(text: &str) -> String {
    let cleaned = ILLEGAL_RE.replace_all(text, "_");
    let cleaned = WHITESPACE_RE.replace_all(&cleaned, " ");
    let trimmed = cleaned.trim_matches(|c| c == '_' || c == ' ');
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed.chars().take(100).collect()
}

/// On-disk attachment storage under `root/YYYY/MM/`. Writes go to a
/// `.part` file first so a crashed download never leaves a final-named
/// partial on disk.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn store(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
        bytes: &Bytes,
    ) -> Result<PathBuf, ArchiveError> {
        let now = Utc::now();
        let dir = self
            .root
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let name = spec.filename.as_deref().unwrap_or(&spec.attachment_ref);
        let final_name = format!(
            "{}_{:03}_{}",
            sanitize_filename(record_id),
            seq,
            sanitize_filename(name)
        );

        let final_path = dir.join(&final_name);
        let part_path = dir.join(format!("{final_name}.part"));

        tokio::fs::write(&part_path, bytes).await?;
        tokio::fs::rename(&part_path, &final_path).await?;

        Ok(final_path)
    }
}
