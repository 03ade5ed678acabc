//! Transfer progress accounting, reported over a `watch` channel so a
//! UI or log line can subscribe without polling.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

pub struct ProgressTracker {
    total_chunks: AtomicU64,
    completed_chunks: AtomicU64,
    progress_sender: watch::Sender<f64>,
}

impl ProgressTracker {
    pub fn new(total_chunks: u64, progress_sender: watch::Sender<f64>) -> Self {
        Self {
            total_chunks: AtomicU64::new(total_chunks),
            completed_chunks: AtomicU64::new(0),
            progress_sender,
        }
    }

    /// Returns `(completed, total)` after recording one more finished chunk.
    pub fn increment(&self) -> (u64, u64) {
        let completed = self.completed_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total_chunks.load(Ordering::SeqCst);
        self.update_progress(completed, total);
        (completed, total)
    }

    pub fn set_total(&self, total: u64) {
        self.total_chunks.store(total, Ordering::SeqCst);
    }

    pub fn get_progress(&self) -> (u64, u64) {
        (
            self.completed_chunks.load(Ordering::SeqCst),
            self.total_chunks.load(Ordering::SeqCst),
        )
    }

    pub fn complete(&self) {
        let _ = self.progress_sender.send(100.0);
    }

    fn update_progress(&self, completed: u64, total: u64) {
        let raw_progress = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        // Cap below 100 until `complete()` is called explicitly.
        let _ = self.progress_sender.send(raw_progress.min(99.0));
    }
}

impl Clone for ProgressTracker {
    fn clone(&self) -> Self {
        let (completed, total) = self.get_progress();
        Self {
            total_chunks: AtomicU64::new(total),
            completed_chunks: AtomicU64::new(completed),
            progress_sender: self.progress_sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_caps_at_99_until_complete() {
        let (tx, rx) = watch::channel(0.0);
        let tracker = ProgressTracker::new(2, tx);
        tracker.increment();
        tracker.increment();
        assert!(*rx.borrow() <= 99.0);
        tracker.complete();
        assert_eq!(*rx.borrow(), 100.0);
    }

    #[test]
    fn clone_shares_no_state_after_store() {
        let (tx, _rx) = watch::channel(0.0);
        let tracker = ProgressTracker::new(3, tx);
        tracker.increment();
        let cloned = tracker.clone();
        tracker.increment();
        assert_eq!(cloned.get_progress().0, 1);
    }
}
