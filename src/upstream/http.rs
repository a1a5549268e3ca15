use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::UpstreamSettings;

use super::{AttachmentFetcher, FetchResponse, FetchedAttachment, RecordFetcher, TransportError};

/// Upstream API client. One reqwest client shared across the worker,
/// with the configured timeout applied to every request.
pub struct HttpUpstream {
    client: reqwest::Client,
    settings: UpstreamSettings,
}

impl HttpUpstream {
    pub fn new(settings: UpstreamSettings) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(settings.timeout)
                .build()
                .expect("Failed to build reqwest client"),
            settings,
        }
    }

    fn record_url(&self, record_id: &str) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let path = self.settings.record_path.replace("{id}", record_id);
        format!("{base}{path}")
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl RecordFetcher for HttpUpstream {
    async fn fetch_record(&self, record_id: &str) -> Result<FetchResponse, TransportError> {
        let url = self.record_url(record_id);

        let resp = self
            .authorized(self.client.get(&url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::from(format!("record request failed: {e}")))?;

        let status = resp.status().as_u16();
        // Non-JSON bodies (error pages, empty 204s) come back as Null.
        let body = resp
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);

        Ok(FetchResponse { status, body })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpUpstream {
    async fn download(&self, url: &str) -> Result<FetchedAttachment, TransportError> {
        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| TransportError::from(format!("attachment request failed: {e}")))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(TransportError::from(format!(
                "attachment download returned status {status}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::from(format!("attachment body read failed: {e}")))?;
        let checksum = hex::encode(Sha256::digest(&bytes));

        Ok(FetchedAttachment { bytes, checksum })
    }
}
