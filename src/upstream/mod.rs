pub mod http;

use async_trait::async_trait;
use bytes::Bytes;

/// Transport-level failure: connect errors, timeouts, TLS problems.
/// Anything that never produced an HTTP status line.
#[derive(Debug)]
pub struct TransportError {
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for TransportError {
    fn from(s: String) -> Self {
        TransportError { message: s }
    }
}

impl From<&str> for TransportError {
    fn from(s: &str) -> Self {
        TransportError {
            message: s.to_string(),
        }
    }
}

/// A completed HTTP exchange. Non-2xx statuses are returned here, not as
/// errors, so the caller can tell rate limiting apart from other refusals.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

/// A fully downloaded attachment body with its SHA-256 checksum.
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub bytes: Bytes,
    pub checksum: String,
}

#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch_record(&self, record_id: &str) -> Result<FetchResponse, TransportError>;
}

#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn download(&self, url: &str) -> Result<FetchedAttachment, TransportError>;
}
