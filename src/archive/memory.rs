use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::{AttachmentRecord, AttachmentSpec, AttachmentState};

use super::{Archive, ArchiveError};

/// In-memory archive for tests and ephemeral runs. Attachment bytes are
/// kept in a map instead of on disk.
#[derive(Default)]
pub struct MemoryArchive {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, serde_json::Value>,
    ledger: HashMap<(String, String), AttachmentRecord>,
    blobs: HashMap<(String, String), Bytes>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, record_id: &str) -> Option<serde_json::Value> {
        self.inner.lock().await.records.get(record_id).cloned()
    }

    pub async fn blob(&self, record_id: &str, attachment_ref: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .await
            .blobs
            .get(&(record_id.to_string(), attachment_ref.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Archive for MemoryArchive {
    async fn upsert_record(
        &self,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ArchiveError> {
        self.inner
            .lock()
            .await
            .records
            .insert(record_id.to_string(), payload.clone());
        Ok(())
    }

    async fn attachment_state(
        &self,
        record_id: &str,
        attachment_ref: &str,
    ) -> Result<Option<AttachmentState>, ArchiveError> {
        Ok(self
            .inner
            .lock()
            .await
            .ledger
            .get(&(record_id.to_string(), attachment_ref.to_string()))
            .map(|entry| entry.state))
    }

    async fn attachment_started(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
    ) -> Result<(), ArchiveError> {
        self.inner.lock().await.ledger.insert(
            (record_id.to_string(), spec.attachment_ref.clone()),
            AttachmentRecord {
                record_id: record_id.to_string(),
                attachment_ref: spec.attachment_ref.clone(),
                seq,
                filename: spec.filename.clone(),
                state: AttachmentState::Pending,
                checksum: None,
                size_bytes: None,
                downloaded_at: None,
                last_error: None,
            },
        );
        Ok(())
    }

    async fn store_attachment(
        &self,
        record_id: &str,
        _seq: i32,
        spec: &AttachmentSpec,
        bytes: &Bytes,
    ) -> Result<(), ArchiveError> {
        self.inner.lock().await.blobs.insert(
            (record_id.to_string(), spec.attachment_ref.clone()),
            bytes.clone(),
        );
        Ok(())
    }

    async fn attachment_validated(
        &self,
        record_id: &str,
        attachment_ref: &str,
        checksum: &str,
        size: i64,
    ) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().await;
        let key = (record_id.to_string(), attachment_ref.to_string());
        match inner.ledger.get_mut(&key) {
            Some(entry) => {
                entry.state = AttachmentState::Validated;
                entry.checksum = Some(checksum.to_string());
                entry.size_bytes = Some(size);
                entry.downloaded_at = Some(Utc::now());
                entry.last_error = None;
                Ok(())
            }
            None => Err(ArchiveError::from(format!(
                "unknown attachment: {record_id}/{attachment_ref}"
            ))),
        }
    }

    async fn attachment_failed(
        &self,
        record_id: &str,
        attachment_ref: &str,
        state: AttachmentState,
        error: &str,
    ) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().await;
        let key = (record_id.to_string(), attachment_ref.to_string());
        match inner.ledger.get_mut(&key) {
            Some(entry) => {
                entry.state = state;
                entry.last_error = Some(error.to_string());
                Ok(())
            }
            None => Err(ArchiveError::from(format!(
                "unknown attachment: {record_id}/{attachment_ref}"
            ))),
        }
    }

    async fn attachments_for(
        &self,
        record_id: &str,
    ) -> Result<Vec<AttachmentRecord>, ArchiveError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<AttachmentRecord> = inner
            .ledger
            .values()
            .filter(|entry| entry.record_id == record_id)
            .cloned()
            .collect();
        rows.sort_by_key(|entry| entry.seq);
        Ok(rows)
    }
}
