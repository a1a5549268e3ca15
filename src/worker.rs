use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::archive::Archive;
use crate::breaker::CircuitBreaker;
use crate::config::WorkerSettings;
use crate::models::{
    AttachmentSpec, AttachmentState, ErrorKind, FailureKind, ItemOutcome, WorkItem,
};
use crate::queue::WorkQueue;
use crate::upstream::{
    AttachmentFetcher, FetchResponse, FetchedAttachment, RecordFetcher, TransportError,
};

/// How one item left the worker, for cycle statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Partial,
    Failed,
    Blocked,
    Interrupted,
}

/// Processes one work item end to end: breaker gate, record fetch,
/// persistence, attachment downloads, outcome bookkeeping.
pub struct IngestionWorker {
    queue: Arc<dyn WorkQueue>,
    archive: Arc<dyn Archive>,
    fetcher: Arc<dyn RecordFetcher>,
    attachments: Arc<dyn AttachmentFetcher>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    settings: WorkerSettings,
}

impl IngestionWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        archive: Arc<dyn Archive>,
        fetcher: Arc<dyn RecordFetcher>,
        attachments: Arc<dyn AttachmentFetcher>,
        breaker: Arc<Mutex<CircuitBreaker>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            archive,
            fetcher,
            attachments,
            breaker,
            settings,
        }
    }

    /// Process a claimed item. Blocked items are released untouched so
    /// they keep their status and stay eligible for the next cycle.
    pub async fn process(&self, item: &WorkItem, shutdown: &watch::Receiver<bool>) -> Disposition {
        if let Err(blocked) = self.breaker.lock().await.before_call() {
            tracing::debug!("Skipping {}: {blocked}", item.record_id);
            if let Err(e) = self.queue.release(&item.record_id).await {
                tracing::error!("Failed to release {}: {e}", item.record_id);
            }
            return Disposition::Blocked;
        }

        if let Err(e) = self.queue.mark_started(&item.record_id).await {
            tracing::warn!("Failed to mark {} in flight: {e}", item.record_id);
        }

        let outcome = self.attempt(item, shutdown).await;
        let disposition = match &outcome {
            ItemOutcome::Success => Disposition::Completed,
            ItemOutcome::Interrupted => Disposition::Interrupted,
            ItemOutcome::Failure {
                kind: FailureKind::Partial,
                ..
            } => Disposition::Partial,
            ItemOutcome::Failure { .. } => Disposition::Failed,
        };

        if let Err(e) = self.queue.record_outcome(&item.record_id, outcome).await {
            tracing::error!("Failed to record outcome for {}: {e}", item.record_id);
        }

        disposition
    }

    async fn attempt(&self, item: &WorkItem, shutdown: &watch::Receiver<bool>) -> ItemOutcome {
        let response = match self.fetch_with_cooldown(&item.record_id).await {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.lock().await.record_failure();
                return ItemOutcome::Failure {
                    kind: FailureKind::UpstreamError,
                    error: ErrorKind::Transport,
                    message: e.message,
                };
            }
        };

        if response.is_rate_limited() {
            self.breaker.lock().await.record_failure();
            return ItemOutcome::Failure {
                kind: FailureKind::UpstreamError,
                error: ErrorKind::RateLimited,
                message: "upstream rate limited (429) after cooldown retry".to_string(),
            };
        }

        if !response.is_success() {
            self.breaker.lock().await.record_failure();
            return ItemOutcome::Failure {
                kind: FailureKind::UpstreamError,
                error: ErrorKind::UpstreamStatus,
                message: format!("upstream returned status {}", response.status),
            };
        }

        // The upstream answered; persistence problems are ours, not theirs.
        self.breaker.lock().await.record_success();

        if let Err(e) = self
            .archive
            .upsert_record(&item.record_id, &response.body)
            .await
        {
            return ItemOutcome::Failure {
                kind: FailureKind::UpstreamError,
                error: ErrorKind::Persistence,
                message: e.message,
            };
        }

        let specs = AttachmentSpec::from_payload(&response.body);
        if specs.is_empty() {
            return ItemOutcome::Success;
        }

        self.download_attachments(&item.record_id, &specs, shutdown)
            .await
    }

    /// Fetch the record, absorbing at most one 429 with a cooldown sleep
    /// before retrying. Only the final response reaches the breaker.
    async fn fetch_with_cooldown(
        &self,
        record_id: &str,
    ) -> Result<FetchResponse, TransportError> {
        let first = self.fetcher.fetch_record(record_id).await?;
        if !first.is_rate_limited() {
            return Ok(first);
        }

        tracing::warn!(
            "Rate limited fetching {record_id}, cooling down for {}s",
            self.settings.rate_limit_cooldown.as_secs()
        );
        tokio::time::sleep(self.settings.rate_limit_cooldown).await;
        self.fetcher.fetch_record(record_id).await
    }

    async fn download_attachments(
        &self,
        record_id: &str,
        specs: &[AttachmentSpec],
        shutdown: &watch::Receiver<bool>,
    ) -> ItemOutcome {
        let mut validated = 0usize;
        let mut first_error: Option<(ErrorKind, String)> = None;

        for (index, spec) in specs.iter().enumerate() {
            if *shutdown.borrow() {
                tracing::info!(
                    "Shutdown requested, interrupting {record_id} after {validated}/{} attachments",
                    specs.len()
                );
                return ItemOutcome::Interrupted;
            }

            if index > 0 && !self.settings.attachment_pause.is_zero() {
                tokio::time::sleep(self.settings.attachment_pause).await;
            }

            let seq = (index + 1) as i32;
            match self.download_one(record_id, seq, spec).await {
                Ok(()) => validated += 1,
                Err((kind, message)) => {
                    tracing::warn!(
                        "Attachment {seq} of {record_id} failed: {message}"
                    );
                    if first_error.is_none() {
                        first_error = Some((kind, message));
                    }
                }
            }
        }

        if validated == specs.len() {
            return ItemOutcome::Success;
        }

        let (error, message) =
            first_error.unwrap_or((ErrorKind::Validation, "attachment failed".to_string()));
        let kind = if validated > 0 {
            FailureKind::Partial
        } else {
            FailureKind::Failed
        };
        ItemOutcome::Failure {
            kind,
            error,
            message,
        }
    }

    /// Download and validate one attachment. Already-validated entries in
    /// the ledger are skipped, which is what makes a retried item resume
    /// where the last attempt stopped.
    async fn download_one(
        &self,
        record_id: &str,
        seq: i32,
        spec: &AttachmentSpec,
    ) -> Result<(), (ErrorKind, String)> {
        match self
            .archive
            .attachment_state(record_id, &spec.attachment_ref)
            .await
        {
            Ok(Some(AttachmentState::Validated)) => {
                tracing::debug!(
                    "Attachment {} of {record_id} already validated, skipping",
                    spec.attachment_ref
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err((ErrorKind::Persistence, e.message)),
        }

        if let Err(e) = self.archive.attachment_started(record_id, seq, spec).await {
            return Err((ErrorKind::Persistence, e.message));
        }

        let fetched = match self.download_validated(spec).await {
            Ok(fetched) => fetched,
            Err((kind, message)) => {
                let state = if kind == ErrorKind::Transport {
                    AttachmentState::Failed
                } else {
                    AttachmentState::ValidationFailed
                };
                if let Err(e) = self
                    .archive
                    .attachment_failed(record_id, &spec.attachment_ref, state, &message)
                    .await
                {
                    tracing::error!(
                        "Failed to record attachment failure for {record_id}: {e}"
                    );
                }
                return Err((kind, message));
            }
        };

        if let Err(e) = self
            .archive
            .store_attachment(record_id, seq, spec, &fetched.bytes)
            .await
        {
            if let Err(mark) = self
                .archive
                .attachment_failed(
                    record_id,
                    &spec.attachment_ref,
                    AttachmentState::Failed,
                    &e.message,
                )
                .await
            {
                tracing::error!(
                    "Failed to record attachment failure for {record_id}: {mark}"
                );
            }
            return Err((ErrorKind::Persistence, e.message));
        }

        let size = fetched.bytes.len() as i64;
        if let Err(e) = self
            .archive
            .attachment_validated(record_id, &spec.attachment_ref, &fetched.checksum, size)
            .await
        {
            return Err((ErrorKind::Persistence, e.message));
        }

        tracing::info!(
            "Downloaded attachment {seq} of {record_id}: {} ({size} bytes)",
            spec.filename.as_deref().unwrap_or(&spec.attachment_ref)
        );
        Ok(())
    }

    /// One download plus validation, with a single immediate re-download
    /// when validation rejects the body. Transport errors do not retry
    /// here; the queue-level backoff owns that.
    async fn download_validated(
        &self,
        spec: &AttachmentSpec,
    ) -> Result<FetchedAttachment, (ErrorKind, String)> {
        let fetched = self
            .attachments
            .download(&spec.url)
            .await
            .map_err(|e| (ErrorKind::Transport, e.message))?;

        let reason = match self.validate(spec, &fetched) {
            Ok(()) => return Ok(fetched),
            Err(reason) => reason,
        };
        tracing::warn!("Attachment {} rejected ({reason}), re-downloading", spec.url);

        let retried = self
            .attachments
            .download(&spec.url)
            .await
            .map_err(|e| (ErrorKind::Transport, e.message))?;
        match self.validate(spec, &retried) {
            Ok(()) => Ok(retried),
            Err(reason) => Err((ErrorKind::Validation, reason)),
        }
    }

    fn validate(&self, spec: &AttachmentSpec, fetched: &FetchedAttachment) -> Result<(), String> {
        let size = fetched.bytes.len() as u64;
        if size == 0 {
            return Err("empty attachment body".to_string());
        }
        if size < self.settings.attachment_min_bytes {
            return Err(format!(
                "attachment too small: {size} bytes (minimum {})",
                self.settings.attachment_min_bytes
            ));
        }
        if let Some(expected) = &spec.expected_checksum {
            if !expected.eq_ignore_ascii_case(&fetched.checksum) {
                return Err(format!(
                    "checksum mismatch: expected {expected}, got {}",
                    fetched.checksum
                ));
            }
        }
        if let Some(expected) = spec.expected_size {
            if fetched.bytes.len() as i64 != expected {
                return Err(format!(
                    "size mismatch: expected {expected} bytes, got {size}"
                ));
            }
        }
        Ok(())
    }
}
