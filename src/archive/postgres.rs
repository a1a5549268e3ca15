use async_trait::async_trait;
use bytes::Bytes;
use sqlx::PgPool;

use crate::models::{AttachmentRecord, AttachmentSpec, AttachmentState};

use super::{Archive, ArchiveError, FileStore};

/// Postgres-backed archive: payloads and the attachment ledger live in
/// the database, attachment bytes on disk via [`FileStore`].
pub struct PgArchive {
    pool: PgPool,
    files: FileStore,
}

impl PgArchive {
    pub fn new(pool: PgPool, files: FileStore) -> Self {
        Self { pool, files }
    }
}

#[async_trait]
impl Archive for PgArchive {
    async fn upsert_record(
        &self,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ArchiveError> {
        sqlx::query(
            r#"
            INSERT INTO records (record_id, payload, fetched_at, updated_at)
            VALUES ($1, $2, now(), now())
            ON CONFLICT (record_id) DO UPDATE
            SET payload = EXCLUDED.payload,
                updated_at = now()
            "#,
        )
        .bind(record_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attachment_state(
        &self,
        record_id: &str,
        attachment_ref: &str,
    ) -> Result<Option<AttachmentState>, ArchiveError> {
        let state = sqlx::query_scalar::<_, AttachmentState>(
            "SELECT state FROM attachments WHERE record_id = $1 AND attachment_ref = $2",
        )
        .bind(record_id)
        .bind(attachment_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn attachment_started(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
    ) -> Result<(), ArchiveError> {
        sqlx::query(
            r#"
            INSERT INTO attachments (record_id, attachment_ref, seq, filename, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (record_id, attachment_ref) DO UPDATE
            SET seq = EXCLUDED.seq,
                filename = EXCLUDED.filename,
                state = EXCLUDED.state,
                last_error = NULL
            "#,
        )
        .bind(record_id)
        .bind(&spec.attachment_ref)
        .bind(seq)
        .bind(&spec.filename)
        .bind(AttachmentState::Pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_attachment(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
        bytes: &Bytes,
    ) -> Result<(), ArchiveError> {
        self.files.store(record_id, seq, spec, bytes).await?;
        Ok(())
    }

    async fn attachment_validated(
        &self,
        record_id: &str,
        attachment_ref: &str,
        checksum: &str,
        size: i64,
    ) -> Result<(), ArchiveError> {
        sqlx::query(
            r#"
            UPDATE attachments
            SET state = $3,
                checksum = $4,
                size_bytes = $5,
                downloaded_at = now(),
                last_error = NULL
            WHERE record_id = $1 AND attachment_ref = $2
            "#,
        )
        .bind(record_id)
        .bind(attachment_ref)
        .bind(AttachmentState::Validated)
        .bind(checksum)
        .bind(size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attachment_failed(
        &self,
        record_id: &str,
        attachment_ref: &str,
        state: AttachmentState,
        error: &str,
    ) -> Result<(), ArchiveError> {
        sqlx::query(
            r#"
            UPDATE attachments
            SET state = $3,
                last_error = $4
            WHERE record_id = $1 AND attachment_ref = $2
            "#,
        )
        .bind(record_id)
        .bind(attachment_ref)
        .bind(state)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attachments_for(
        &self,
        record_id: &str,
    ) -> Result<Vec<AttachmentRecord>, ArchiveError> {
        let rows = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT * FROM attachments WHERE record_id = $1 ORDER BY seq",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
