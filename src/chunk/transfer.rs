//! Per-transfer chunk state machine (spec §3 TransferSession): an
//! ordered `chunkStates` vector plus a status derived from it, rather
//! than a bare done-count. Distinct from `session::ProtocolSession`,
//! which tracks the HTTP-level negotiation, not individual chunks.

use super::plan::ChunkPlan;
use super::progress::ProgressTracker;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Initializing,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone)]
pub struct TransferSession {
    inner: Arc<TransferSessionInner>,
}

struct TransferSessionInner {
    direction: TransferDirection,
    file_size: u64,
    chunk_size: u64,
    chunk_states: Mutex<Vec<ChunkState>>,
    completed_chunks: AtomicU64,
    failed_chunks: AtomicU64,
    start_time: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    status: Mutex<TransferStatus>,
    progress: ProgressTracker,
}

impl TransferSession {
    pub fn new(
        direction: TransferDirection,
        file_size: u64,
        chunk_size: u64,
        progress_sender: watch::Sender<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_chunks = ChunkPlan::new(file_size, chunk_size).total_chunks();
        let inner = Arc::new(TransferSessionInner {
            direction,
            file_size,
            chunk_size,
            chunk_states: Mutex::new(vec![ChunkState::Pending; total_chunks as usize]),
            completed_chunks: AtomicU64::new(0),
            failed_chunks: AtomicU64::new(0),
            start_time: now,
            last_activity: Mutex::new(now),
            status: Mutex::new(TransferStatus::Initializing),
            progress: ProgressTracker::new(total_chunks, progress_sender),
        });
        let session = Self { inner };
        session.activate();
        session
    }

    pub fn direction(&self) -> TransferDirection {
        self.inner.direction
    }

    pub fn file_size(&self) -> u64 {
        self.inner.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.inner.chunk_size
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.inner.last_activity.lock().unwrap()
    }

    pub fn status(&self) -> TransferStatus {
        *self.inner.status.lock().unwrap()
    }

    pub fn total_chunks(&self) -> u64 {
        self.inner.chunk_states.lock().unwrap().len() as u64
    }

    pub fn completed_chunks(&self) -> u64 {
        self.inner.completed_chunks.load(Ordering::SeqCst)
    }

    pub fn failed_chunks(&self) -> u64 {
        self.inner.failed_chunks.load(Ordering::SeqCst)
    }

    pub fn chunk_state(&self, idx: u64) -> Option<ChunkState> {
        self.inner.chunk_states.lock().unwrap().get(idx as usize).copied()
    }

    pub fn progress(&self) -> (u64, u64) {
        self.inner.progress.get_progress()
    }

    pub fn is_complete(&self) -> bool {
        self.status() == TransferStatus::Completed
    }

    /// Moves a fresh session out of `Initializing`. A zero-chunk
    /// (empty file) transfer has nothing left to mark, so it settles
    /// straight to `Completed`.
    pub fn activate(&self) {
        let total = self.total_chunks();
        let mut status = self.inner.status.lock().unwrap();
        if *status == TransferStatus::Initializing {
            *status = if total == 0 {
                TransferStatus::Completed
            } else {
                TransferStatus::Active
            };
        }
    }

    pub fn mark_in_flight(&self, idx: u64) {
        let mut states = self.inner.chunk_states.lock().unwrap();
        if let Some(state) = states.get_mut(idx as usize) {
            if *state == ChunkState::Pending {
                *state = ChunkState::InFlight;
            }
        }
    }

    /// Marks `idx` `Completed`; idempotent, out-of-range indices are a
    /// no-op. Updates `lastActivity` and, once every chunk is
    /// accounted for, the overall session status.
    pub fn mark_completed(&self, idx: u64, now: DateTime<Utc>) {
        let mut states = self.inner.chunk_states.lock().unwrap();
        let Some(state) = states.get_mut(idx as usize) else {
            return;
        };
        if *state != ChunkState::Completed {
            let was_failed = *state == ChunkState::Failed;
            *state = ChunkState::Completed;
            self.inner.completed_chunks.fetch_add(1, Ordering::SeqCst);
            if was_failed {
                self.inner.failed_chunks.fetch_sub(1, Ordering::SeqCst);
            }
            self.inner.progress.increment();
        }
        *self.inner.last_activity.lock().unwrap() = now;
        self.settle_status(&states);
    }

    /// Marks `idx` `Failed` without aborting the session (spec §4.H):
    /// the session only settles into `Failed` once every chunk has
    /// concluded (completed or failed) and at least one failed.
    pub fn mark_failed(&self, idx: u64, now: DateTime<Utc>) {
        let mut states = self.inner.chunk_states.lock().unwrap();
        let Some(state) = states.get_mut(idx as usize) else {
            return;
        };
        if *state != ChunkState::Failed {
            *state = ChunkState::Failed;
            self.inner.failed_chunks.fetch_add(1, Ordering::SeqCst);
        }
        *self.inner.last_activity.lock().unwrap() = now;
        self.settle_status(&states);
    }

    pub fn cancel(&self) {
        *self.inner.status.lock().unwrap() = TransferStatus::Cancelled;
    }

    fn settle_status(&self, states: &[ChunkState]) {
        let total = states.len() as u64;
        let completed = self.inner.completed_chunks.load(Ordering::SeqCst);
        let failed = self.inner.failed_chunks.load(Ordering::SeqCst);

        let mut status = self.inner.status.lock().unwrap();
        if *status == TransferStatus::Cancelled {
            return;
        }
        if completed == total {
            *status = TransferStatus::Completed;
            self.inner.progress.complete();
        } else if completed + failed == total && failed > 0 {
            *status = TransferStatus::Failed;
        } else if *status == TransferStatus::Initializing {
            *status = TransferStatus::Active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(file_size: u64, chunk_size: u64) -> TransferSession {
        let (tx, _rx) = watch::channel(0.0);
        TransferSession::new(TransferDirection::Upload, file_size, chunk_size, tx, Utc::now())
    }

    #[test]
    fn total_chunks_matches_plan() {
        let session = session(10, 3);
        assert_eq!(session.total_chunks(), 4);
        assert_eq!(session.status(), TransferStatus::Active);
    }

    #[test]
    fn empty_file_completes_immediately() {
        let session = session(0, 64);
        assert_eq!(session.total_chunks(), 0);
        assert!(session.is_complete());
    }

    #[test]
    fn marking_same_chunk_completed_twice_counts_once() {
        let session = session(2, 1);
        let now = Utc::now();
        session.mark_completed(0, now);
        session.mark_completed(0, now);
        assert_eq!(session.completed_chunks(), 1);
    }

    #[test]
    fn completed_once_all_chunks_marked() {
        let session = session(2, 1);
        let now = Utc::now();
        session.mark_completed(0, now);
        assert_eq!(session.status(), TransferStatus::Active);
        session.mark_completed(1, now);
        assert_eq!(session.status(), TransferStatus::Completed);
    }

    #[test]
    fn failed_chunk_does_not_abort_session() {
        let session = session(3, 1);
        let now = Utc::now();
        session.mark_failed(0, now);
        assert_eq!(session.status(), TransferStatus::Active);
        assert_eq!(session.failed_chunks(), 1);
    }

    #[test]
    fn session_fails_only_once_every_chunk_has_concluded() {
        let session = session(2, 1);
        let now = Utc::now();
        session.mark_failed(0, now);
        assert_eq!(session.status(), TransferStatus::Active);
        session.mark_completed(1, now);
        assert_eq!(session.status(), TransferStatus::Failed);
    }

    #[test]
    fn completed_chunk_after_failure_reduces_failed_count() {
        let session = session(2, 1);
        let now = Utc::now();
        session.mark_failed(0, now);
        session.mark_completed(0, now);
        assert_eq!(session.failed_chunks(), 0);
        assert_eq!(session.completed_chunks(), 1);
    }

    #[test]
    fn cancel_is_terminal_and_not_overwritten_by_later_marks() {
        let session = session(2, 1);
        let now = Utc::now();
        session.cancel();
        session.mark_completed(0, now);
        session.mark_completed(1, now);
        assert_eq!(session.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn out_of_range_index_is_a_no_op() {
        let session = session(1, 1);
        session.mark_completed(5, Utc::now());
        assert_eq!(session.completed_chunks(), 0);
    }
}
