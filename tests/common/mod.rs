#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify, watch};

use siphon::breaker::CircuitBreaker;
use siphon::config::{BreakerSettings, RetrySettings, WorkerSettings};
use siphon::queue::memory::MemoryWorkQueue;
use siphon::scheduler::SchedulerPhase;
use siphon::state::AppState;
use siphon::upstream::{
    AttachmentFetcher, FetchResponse, FetchedAttachment, RecordFetcher, TransportError,
};

pub fn retry_settings() -> RetrySettings {
    RetrySettings {
        max_attempts: 5,
        backoff_base: Duration::from_secs(300),
        backoff_multiplier: 2.0,
        backoff_cap: Duration::from_secs(86_400),
    }
}

pub fn breaker_settings(sample_size: usize) -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 0.5,
        recovery_threshold: 0.3,
        open_duration: Duration::from_secs(300),
        sample_size,
    }
}

pub fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        rate_limit_cooldown: Duration::from_millis(10),
        attachment_pause: Duration::ZERO,
        attachment_min_bytes: 1,
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Record payload carrying an attachments array, in the upstream's shape.
pub fn payload_with_attachments(attachments: Value) -> Value {
    json!({ "title": "Inspection", "attachments": attachments })
}

pub enum Scripted {
    Status(u16, Value),
    Error(String),
}

/// Record fetcher driven by a per-id script of responses. Unscripted
/// fetches answer 200 with an empty object.
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, record_id: &str, step: Scripted) {
        self.script
            .lock()
            .await
            .entry(record_id.to_string())
            .or_default()
            .push_back(step);
    }

    pub async fn fetch_count(&self, record_id: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|id| id.as_str() == record_id)
            .count()
    }
}

#[async_trait]
impl RecordFetcher for ScriptedFetcher {
    async fn fetch_record(&self, record_id: &str) -> Result<FetchResponse, TransportError> {
        self.log.lock().await.push(record_id.to_string());
        let step = self
            .script
            .lock()
            .await
            .get_mut(record_id)
            .and_then(|steps| steps.pop_front());
        match step {
            Some(Scripted::Status(status, body)) => Ok(FetchResponse { status, body }),
            Some(Scripted::Error(message)) => Err(TransportError::from(message)),
            None => Ok(FetchResponse {
                status: 200,
                body: json!({}),
            }),
        }
    }
}

/// Attachment fetcher answering from scripted bodies, computing the real
/// checksum of whatever it hands out.
pub struct ScriptedAttachments {
    bodies: Mutex<HashMap<String, VecDeque<Result<Bytes, String>>>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedAttachments {
    pub fn new() -> Self {
        Self {
            bodies: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub async fn push_body(&self, url: &str, bytes: &[u8]) {
        self.bodies
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(Bytes::copy_from_slice(bytes)));
    }

    pub async fn push_error(&self, url: &str, message: &str) {
        self.bodies
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub async fn download_count(&self, url: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl AttachmentFetcher for ScriptedAttachments {
    async fn download(&self, url: &str) -> Result<FetchedAttachment, TransportError> {
        self.log.lock().await.push(url.to_string());
        let step = self
            .bodies
            .lock()
            .await
            .get_mut(url)
            .and_then(|steps| steps.pop_front());
        match step {
            Some(Ok(bytes)) => {
                let checksum = sha256_hex(&bytes);
                Ok(FetchedAttachment { bytes, checksum })
            }
            Some(Err(message)) => Err(TransportError::from(message)),
            None => Err(TransportError::from(format!("no scripted body for {url}"))),
        }
    }
}

/// A running ops API instance over in-memory backends.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub queue: Arc<MemoryWorkQueue>,
    pub breaker: Arc<Mutex<CircuitBreaker>>,
    pub wake: Arc<Notify>,
    pub shutdown: watch::Receiver<bool>,
    pub phase: watch::Sender<SchedulerPhase>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

/// Spawn the ops API on a random port with memory-backed state.
pub async fn spawn_app() -> TestApp {
    let queue = Arc::new(MemoryWorkQueue::new(
        retry_settings(),
        Duration::from_secs(3600),
    ));
    let breaker = Arc::new(Mutex::new(CircuitBreaker::new(breaker_settings(10))));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (phase_tx, phase_rx) = watch::channel(SchedulerPhase::Running);
    let wake = Arc::new(Notify::new());

    let state = Arc::new(AppState {
        queue: queue.clone(),
        breaker: breaker.clone(),
        phase: phase_rx,
        wake: wake.clone(),
        shutdown: shutdown_tx,
    });

    let app = siphon::build_app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        queue,
        breaker,
        wake,
        shutdown: shutdown_rx,
        phase: phase_tx,
    }
}
