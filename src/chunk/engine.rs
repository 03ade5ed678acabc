//! Chunk engine (spec §4.H): a stateless `ChunkManager` for chunk
//! slicing/checksumming plus a sid-keyed `ChunkEngine` that drives a
//! [`TransferSession`] through its chunk-state machine. Generalized
//! from a one-shot bounded-concurrency dispatcher into the engine the
//! spec names — chunk failures mark their slot `Failed` and keep
//! going rather than aborting the whole transfer.

use super::retry::RetryPolicy;
use super::transfer::{TransferDirection, TransferSession};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Pure chunk operations: no session state, so these are plain
/// associated functions on a zero-sized type rather than instance
/// methods.
pub struct ChunkManager;

impl ChunkManager {
    pub fn create_chunk(file_bytes: &[u8], start: usize, len: usize) -> Vec<u8> {
        file_bytes[start..start + len].to_vec()
    }

    pub fn checksum(data: &[u8]) -> String {
        crate::crypto::sha256_hex(data)
    }

    /// `validate(data, checksum(data)) == true` for any `data` (spec
    /// §8 testable property); case-insensitive, constant-time compare.
    pub fn validate(data: &[u8], checksum: &str) -> bool {
        let actual = Self::checksum(data);
        actual.eq_ignore_ascii_case(checksum)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkEngineError {
    #[error("transfer session not found")]
    NotFound,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChunkEvent {
    ChunkTransferred { idx: u64, checksum: String },
    Progress { completed: u64, total: u64 },
    TransferCompleted,
}

#[derive(Clone, Debug)]
pub struct ChunkOutcome {
    pub checksum: String,
    pub events: Vec<ChunkEvent>,
}

/// Owns every in-flight [`TransferSession`], keyed by the transfer's
/// own session id — an arena/index rather than a back-pointer graph
/// (spec §9 design note on cyclic graphs).
#[derive(Clone)]
pub struct ChunkEngine {
    sessions: Arc<DashMap<String, TransferSession>>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl ChunkEngine {
    pub fn new(concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn start(
        &self,
        direction: TransferDirection,
        file_size: u64,
        chunk_size: u64,
        progress_sender: watch::Sender<f64>,
        now: DateTime<Utc>,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = TransferSession::new(direction, file_size, chunk_size, progress_sender, now);
        self.sessions.insert(session_id.clone(), session);
        session_id
    }

    pub fn session(&self, session_id: &str) -> Option<TransferSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// `transferChunk` (spec §4.H): guards `session_id`, tolerates a
    /// `None` payload, checksums via [`ChunkManager`], marks the slot
    /// `Completed`, and emits `ChunkTransferred`/`Progress`, finishing
    /// with `TransferCompleted` once every chunk has landed.
    pub fn transfer_chunk(
        &self,
        session_id: &str,
        idx: u64,
        data: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<ChunkOutcome, ChunkEngineError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(ChunkEngineError::NotFound)?
            .clone();

        let checksum = ChunkManager::checksum(data.unwrap_or(&[]));
        session.mark_completed(idx, now);

        let mut events = vec![
            ChunkEvent::ChunkTransferred {
                idx,
                checksum: checksum.clone(),
            },
            ChunkEvent::Progress {
                completed: session.completed_chunks(),
                total: session.total_chunks(),
            },
        ];
        if session.is_complete() {
            events.push(ChunkEvent::TransferCompleted);
        }

        Ok(ChunkOutcome { checksum, events })
    }

    /// `transferChunksParallel` (spec §4.H): dispatches `indices`
    /// concurrently (bounded by `self.concurrency`), retrying each per
    /// `self.retry`. A chunk that exhausts its retries is marked
    /// `Failed` rather than aborting the batch; `on_event` observes
    /// `ChunkTransferred`/`Progress` in completion order and a final
    /// `TransferCompleted` if every chunk landed.
    pub async fn transfer_chunks_parallel<F, Fut>(
        &self,
        session_id: &str,
        indices: impl IntoIterator<Item = u64>,
        op: F,
        on_event: impl Fn(&ChunkEvent) + Send + Sync,
    ) -> Result<Vec<(u64, Vec<u8>)>, ChunkEngineError>
    where
        F: Fn(u64) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = Result<Vec<u8>, String>> + Send,
    {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(ChunkEngineError::NotFound)?
            .clone();
        let retry = self.retry;

        let mut dispatch = stream::iter(indices)
            .map(|idx| {
                session.mark_in_flight(idx);
                let op = op.clone();
                let fut = retry.run(move |_attempt| op(idx));
                async move { (idx, fut.await) }
            })
            .buffer_unordered(self.concurrency);

        let mut results = Vec::new();
        while let Some((idx, outcome)) = dispatch.next().await {
            let now = Utc::now();
            match outcome {
                Ok(bytes) => {
                    let checksum = ChunkManager::checksum(&bytes);
                    session.mark_completed(idx, now);
                    on_event(&ChunkEvent::ChunkTransferred { idx, checksum });
                    on_event(&ChunkEvent::Progress {
                        completed: session.completed_chunks(),
                        total: session.total_chunks(),
                    });
                    results.push((idx, bytes));
                }
                Err(_) => {
                    session.mark_failed(idx, now);
                }
            }
        }

        if session.is_complete() {
            on_event(&ChunkEvent::TransferCompleted);
        }

        Ok(results)
    }
}

impl From<ChunkEngineError> for crate::error::AppError {
    fn from(err: ChunkEngineError) -> Self {
        match err {
            ChunkEngineError::NotFound => crate::error::AppError::NotFound(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn engine() -> ChunkEngine {
        ChunkEngine::new(4, RetryPolicy::default())
    }

    #[test]
    fn validate_accepts_matching_checksum() {
        let data = b"hello chunk engine";
        let sum = ChunkManager::checksum(data);
        assert!(ChunkManager::validate(data, &sum));
    }

    #[test]
    fn validate_rejects_wrong_checksum() {
        assert!(!ChunkManager::validate(b"hello", "not-a-real-checksum"));
    }

    #[test]
    fn create_chunk_slices_the_requested_range() {
        let file = b"0123456789".to_vec();
        assert_eq!(ChunkManager::create_chunk(&file, 2, 3), b"234");
    }

    #[test]
    fn transfer_chunk_rejects_unknown_session() {
        let engine = engine();
        let result = engine.transfer_chunk("nope", 0, Some(b"a"), Utc::now());
        assert!(matches!(result, Err(ChunkEngineError::NotFound)));
    }

    #[test]
    fn transfer_chunk_tolerates_null_data() {
        let engine = engine();
        let (tx, _rx) = watch::channel(0.0);
        let sid = engine.start(TransferDirection::Upload, 2, 1, tx, Utc::now());
        let outcome = engine.transfer_chunk(&sid, 0, None, Utc::now()).unwrap();
        assert_eq!(outcome.checksum, ChunkManager::checksum(&[]));
    }

    #[test]
    fn transfer_chunk_completes_session_exactly_once() {
        // Seed scenario: ten sequential chunk transfers on a 10-chunk
        // session fire `TransferCompleted` once, on the final call.
        let engine = engine();
        let (tx, _rx) = watch::channel(0.0);
        let sid = engine.start(TransferDirection::Upload, 10_240, 1024, tx, Utc::now());

        let mut completed_events = 0;
        for idx in 0..10u64 {
            let outcome = engine
                .transfer_chunk(&sid, idx, Some(&[0u8; 4]), Utc::now())
                .unwrap();
            completed_events += outcome
                .events
                .iter()
                .filter(|e| matches!(e, ChunkEvent::TransferCompleted))
                .count();
        }
        assert_eq!(completed_events, 1);
        assert_eq!(engine.session(&sid).unwrap().status(), crate::chunk::TransferStatus::Completed);
    }

    #[tokio::test]
    async fn transfer_chunks_parallel_all_succeed() {
        let engine = engine();
        let (tx, _rx) = watch::channel(0.0);
        let sid = engine.start(TransferDirection::Upload, 3, 1, tx, Utc::now());

        let progresses = Mutex::new(Vec::new());
        let results = engine
            .transfer_chunks_parallel(
                &sid,
                0..3,
                |idx| async move { Ok::<Vec<u8>, String>(vec![idx as u8]) },
                |event| {
                    if let ChunkEvent::Progress { completed, .. } = event {
                        progresses.lock().unwrap().push(*completed);
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(engine.session(&sid).unwrap().completed_chunks(), 3);

        let progresses = progresses.into_inner().unwrap();
        let mut sorted = progresses.clone();
        sorted.sort();
        assert_eq!(progresses, sorted, "progress must be monotonically non-decreasing");
    }

    #[tokio::test]
    async fn transfer_chunks_parallel_marks_failures_without_aborting() {
        let engine = engine();
        let (tx, _rx) = watch::channel(0.0);
        let sid = engine.start(
            TransferDirection::Upload,
            2,
            1,
            tx,
            Utc::now(),
        );
        let engine = ChunkEngine {
            retry: RetryPolicy {
                base: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 2,
                ..RetryPolicy::default()
            },
            ..engine
        };

        let results = engine
            .transfer_chunks_parallel(
                &sid,
                0..2,
                |idx| async move {
                    if idx == 0 {
                        Err("permanent failure".to_string())
                    } else {
                        Ok(vec![idx as u8])
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let session = engine.session(&sid).unwrap();
        assert_eq!(session.failed_chunks(), 1);
        assert_eq!(session.completed_chunks(), 1);
        assert_eq!(session.status(), crate::chunk::TransferStatus::Failed);
    }
}
