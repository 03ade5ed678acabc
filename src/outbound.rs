//! Outbound HTTP client (spec §4.K): per-host bounded connection pool,
//! exponential backoff shared with the chunk engine
//! ([`crate::chunk::RetryPolicy`]), a short-lived response cache, and
//! replay-protection headers attached to every request. Modeled on the
//! teacher's connection-discipline idiom in `send/state.rs` (bounded
//! concurrency via a semaphore) generalized from file-chunk dispatch to
//! arbitrary HTTP calls.

use crate::chunk::{read_chunk_at_position, ChunkEngine, ChunkPlan, RetryPolicy, TransferDirection};
use crate::crypto::sha256_hex;
use crate::encryption::{write_frame, MAX_CHUNK_LEN};
use crate::security::{ReplayDetector, ThreatLevel};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_PER_HOST_CAPACITY: usize = 10;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned {status}")]
    Status { status: u16, body: Vec<u8> },
    #[error("operation cancelled")]
    Cancelled,
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

#[derive(Clone, Debug)]
pub struct OutboundResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

struct CacheEntry {
    response: OutboundResponse,
    expires_at: DateTime<Utc>,
}

/// Per-host semaphore plus the shared response cache and retry policy.
/// Cheaply cloned; intended as a single instance hung off `Runtime`.
#[derive(Clone)]
pub struct OutboundClient {
    client: reqwest::Client,
    host_semaphores: Arc<DashMap<String, Arc<Semaphore>>>,
    cache: Arc<DashMap<String, CacheEntry>>,
    retry: RetryPolicy,
    per_host_capacity: usize,
    cache_ttl: Duration,
}

impl Default for OutboundClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            host_semaphores: Arc::new(DashMap::new()),
            cache: Arc::new(DashMap::new()),
            retry: RetryPolicy::default(),
            per_host_capacity: DEFAULT_PER_HOST_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        self.host_semaphores
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_capacity)))
            .clone()
    }

    fn cache_key(method: &Method, url: &str, body: &[u8]) -> String {
        format!("{method}|{url}|{}", sha256_hex(body))
    }

    /// Send one request, retrying per policy on network errors or a
    /// retryable status. `threat_level` comes from the security
    /// analyzer's assessment of this outbound call's target; High or
    /// Critical bypasses the cache entirely (never serve stale data to
    /// a call already flagged as suspicious).
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Vec<u8>,
        threat_level: ThreatLevel,
        now: DateTime<Utc>,
    ) -> Result<OutboundResponse, OutboundError> {
        let bypass_cache = threat_level >= ThreatLevel::High;
        let cache_key = Self::cache_key(&method, url, &body);

        if !bypass_cache {
            if let Some(entry) = self.cache.get(&cache_key) {
                if entry.expires_at > now {
                    return Ok(entry.response.clone());
                }
            }
        }

        let host = reqwest::Url::parse(url)
            .map_err(|e| OutboundError::Network(e.to_string()))?
            .host_str()
            .ok_or_else(|| OutboundError::Network("url has no host".to_string()))?
            .to_string();
        let semaphore = self.semaphore_for(&host);

        let response = self
            .retry
            .run(|_attempt| {
                let client = self.client.clone();
                let method = method.clone();
                let url = url.to_string();
                let body = body.clone();
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| OutboundError::Cancelled)?;

                    let (timestamp, nonce) = ReplayDetector::fresh_headers(Utc::now());
                    let result = client
                        .request(method, &url)
                        .header("x-timestamp", timestamp)
                        .header("x-nonce", nonce)
                        .body(body)
                        .send()
                        .await;

                    let response = match result {
                        Ok(response) => response,
                        Err(err) => return Err(OutboundError::Network(err.to_string())),
                    };

                    let status = response.status().as_u16();
                    let body = response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .unwrap_or_default();

                    if is_retryable_status(status) {
                        return Err(OutboundError::Status { status, body });
                    }

                    Ok(OutboundResponse { status, body })
                }
            })
            .await?;

        if !bypass_cache {
            self.cache.insert(
                cache_key,
                CacheEntry {
                    response: response.clone(),
                    expires_at: now + chrono::Duration::from_std(self.cache_ttl).unwrap(),
                },
            );
        }

        Ok(response)
    }

    pub fn sweep_cache(&self, now: DateTime<Utc>) {
        self.cache.retain(|_, entry| entry.expires_at > now);
    }

    /// Chunks `file` per `chunk_size` through the chunk engine (H),
    /// reading each chunk in parallel via [`read_chunk_at_position`],
    /// then reassembles them in order — optionally framing the result
    /// through the AEAD encryption codec (I) — into the single body an
    /// `upload` request expects. This is `K` initiating the same
    /// transfer flow outward that the receiver drives inbound.
    pub async fn prepare_upload_body(
        &self,
        chunk_engine: &ChunkEngine,
        file: Arc<std::fs::File>,
        file_size: u64,
        chunk_size: u64,
        keys: Option<(&[u8; 32], &[u8; 32])>,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, OutboundError> {
        let (progress_tx, _progress_rx) = tokio::sync::watch::channel(0.0);
        let session_id = chunk_engine.start(TransferDirection::Upload, file_size, chunk_size, progress_tx, now);
        let plan = ChunkPlan::new(file_size, chunk_size);

        let mut ordered = chunk_engine
            .transfer_chunks_parallel(
                &session_id,
                0..plan.total_chunks(),
                move |idx| {
                    let file = file.clone();
                    async move {
                        let (start, len) = plan
                            .bounds(idx)
                            .ok_or_else(|| "chunk index out of range".to_string())?;
                        read_chunk_at_position(&file, start, len).map_err(|e| e.to_string())
                    }
                },
                |_event| {},
            )
            .await
            .map_err(|e| OutboundError::Network(e.to_string()))?;
        let complete = chunk_engine
            .session(&session_id)
            .is_some_and(|s| s.is_complete());
        chunk_engine.remove(&session_id);

        if !complete {
            return Err(OutboundError::Network(
                "one or more chunks failed after all retries".to_string(),
            ));
        }
        ordered.sort_by_key(|(idx, _)| *idx);

        let mut body = Vec::new();
        for (_, chunk) in &ordered {
            match keys {
                Some((enc_key, mac_key)) => write_frame_in_pieces(&mut body, enc_key, mac_key, chunk)
                    .await
                    .map_err(|e| OutboundError::Network(e.to_string()))?,
                None => body.extend_from_slice(chunk),
            }
        }
        Ok(body)
    }

    /// [`prepare_upload_body`](Self::prepare_upload_body) plus the POST
    /// itself.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_file(
        &self,
        chunk_engine: &ChunkEngine,
        url: &str,
        file: Arc<std::fs::File>,
        file_size: u64,
        chunk_size: u64,
        keys: Option<(&[u8; 32], &[u8; 32])>,
        threat_level: ThreatLevel,
        now: DateTime<Utc>,
    ) -> Result<OutboundResponse, OutboundError> {
        let body = self
            .prepare_upload_body(chunk_engine, file, file_size, chunk_size, keys, now)
            .await?;
        self.send(Method::POST, url, body, threat_level, now).await
    }
}

/// Encryption frames are capped at [`MAX_CHUNK_LEN`], independent of
/// the (usually much larger) transfer chunk size the chunk engine
/// works in, so a transfer chunk is split into one or more frames.
async fn write_frame_in_pieces(
    out: &mut Vec<u8>,
    enc_key: &[u8; 32],
    mac_key: &[u8; 32],
    data: &[u8],
) -> Result<(), crate::error::AppError> {
    if data.is_empty() {
        return Ok(());
    }
    for piece in data.chunks(MAX_CHUNK_LEN) {
        write_frame(out, enc_key, mac_key, piece).await?;
    }
    Ok(())
}
