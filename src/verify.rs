//! Chunk and whole-file digest verification (spec §4.J). Generalized
//! from the teacher's single-shot `calculate_file_hash` (`crypto.rs`)
//! into a session that accumulates one digest per chunk as chunks
//! arrive, then reconciles them against a full-file re-hash at
//! `complete`.

use crate::crypto::DigestAlgorithm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("verification session not found")]
    NotFound,
    #[error("chunk count mismatch: expected {expected}, got {actual}")]
    ChunkCountMismatch { expected: usize, actual: usize },
    #[error("duplicate chunk index {0}")]
    DuplicateIndex(usize),
    #[error("chunk indices do not form a contiguous [0, totalChunks) range")]
    NonContiguousIndices,
    #[error("digest mismatch for {0:?}")]
    DigestMismatch(DigestAlgorithm),
}

fn algo_label(algo: DigestAlgorithm) -> &'static str {
    match algo {
        DigestAlgorithm::Sha256 => "SHA-256",
        DigestAlgorithm::Sha384 => "SHA-384",
        DigestAlgorithm::Sha512 => "SHA-512",
        DigestAlgorithm::Sha1 => "SHA-1",
        DigestAlgorithm::Md5 => "MD5",
    }
}

#[derive(Clone, Debug)]
pub struct StartRequest {
    pub file_name: String,
    pub size: u64,
    pub total_chunks: usize,
    pub algos: Vec<DigestAlgorithm>,
    pub expected: Option<std::collections::HashMap<DigestAlgorithm, String>>,
}

impl StartRequest {
    pub fn new(file_name: impl Into<String>, size: u64, total_chunks: usize) -> Self {
        Self {
            file_name: file_name.into(),
            size,
            total_chunks,
            algos: vec![DigestAlgorithm::Sha256],
            expected: None,
        }
    }
}

/// One recorded chunk digest.
#[derive(Clone, Debug)]
pub struct ChunkHash {
    pub idx: usize,
    pub hex: String,
    pub size: usize,
    pub ts: DateTime<Utc>,
}

struct VerificationSessionState {
    request: StartRequest,
    chunks: Vec<ChunkHash>,
}

#[derive(Clone)]
pub struct VerificationManager {
    sessions: Arc<DashMap<String, VerificationSessionState>>,
}

impl Default for VerificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn start(&self, request: StartRequest) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            VerificationSessionState {
                request,
                chunks: Vec::new(),
            },
        );
        session_id
    }

    /// Record one chunk's digest. `valid` is `true` iff `expected` is
    /// absent or matches the computed digest, case-insensitively.
    pub fn verify_chunk(
        &self,
        session_id: &str,
        idx: usize,
        data: &[u8],
        expected: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, VerificationError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(VerificationError::NotFound)?;

        let hex = crate::crypto::sha256_hex(data);
        let valid = match expected {
            Some(want) => want.eq_ignore_ascii_case(&hex),
            None => true,
        };

        session.chunks.push(ChunkHash {
            idx,
            hex,
            size: data.len(),
            ts: now,
        });

        Ok(valid)
    }

    /// Reconcile the recorded chunk digests against the full file at
    /// `path` (when provided) and emit an optional placeholder
    /// signature on success.
    pub fn complete(
        &self,
        session_id: &str,
        file_bytes: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, VerificationError> {
        let (request, chunks) = {
            let session = self
                .sessions
                .get(session_id)
                .ok_or(VerificationError::NotFound)?;
            (session.request.clone(), session.chunks.clone())
        };

        if chunks.len() != request.total_chunks {
            return Err(VerificationError::ChunkCountMismatch {
                expected: request.total_chunks,
                actual: chunks.len(),
            });
        }

        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            if !seen.insert(chunk.idx) {
                return Err(VerificationError::DuplicateIndex(chunk.idx));
            }
        }
        for idx in 0..request.total_chunks {
            if !seen.contains(&idx) {
                return Err(VerificationError::NonContiguousIndices);
            }
        }

        let mut digest_entries = Vec::new();
        if let Some(bytes) = file_bytes {
            for algo in &request.algos {
                let hex = algo.digest_hex(bytes);
                if let Some(expected) = request
                    .expected
                    .as_ref()
                    .and_then(|map| map.get(algo))
                {
                    if !expected.eq_ignore_ascii_case(&hex) {
                        return Err(VerificationError::DigestMismatch(*algo));
                    }
                }
                digest_entries.push(format!("{}:{hex}", algo_label(*algo)));
            }
        }

        self.sessions.remove(session_id);

        if digest_entries.is_empty() {
            return Ok(None);
        }

        let signature = format!("{}|{}", digest_entries.join("|"), now.to_rfc3339());
        Ok(Some(BASE64.encode(signature)))
    }

    /// Discard a session without reconciling it, e.g. on cancellation.
    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

impl From<VerificationError> for crate::error::AppError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::NotFound => crate::error::AppError::NotFound(err.to_string()),
            VerificationError::DigestMismatch(_) => crate::error::AppError::Tamper,
            other => crate::error::AppError::Validation(other.to_string()),
        }
    }
}
