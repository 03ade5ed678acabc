//! Upload/download session lifecycle (spec §4.D). Generalized from the
//! teacher's single-file, single-use `SessionStore` (`session.rs`)
//! into multi-file sessions keyed by id, with per-file tokens and an
//! expiry sweep.

use super::types::{ProtocolSession, SessionStatus, UploadRequest};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Owns both upload and download protocol sessions. Cheaply cloned
/// (shares the underlying maps via `Arc`). Every mutation of a given
/// session is serialized by `DashMap`'s per-shard locking; cross-
/// session reads take no lock, matching spec §5.
#[derive(Clone)]
pub struct SessionStore {
    uploads: Arc<DashMap<String, ProtocolSession>>,
    downloads: Arc<DashMap<String, ProtocolSession>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(DashMap::new()),
            downloads: Arc::new(DashMap::new()),
        }
    }

    /// Create a new upload session; allocates one opaque token per
    /// file in `request.files`.
    pub fn create_upload(
        &self,
        request: UploadRequest,
        remote_address: String,
        now: DateTime<Utc>,
    ) -> (String, HashMap<String, String>) {
        let session_id = Uuid::new_v4().to_string();
        let file_tokens: HashMap<String, String> = request
            .files
            .keys()
            .map(|file_id| (file_id.clone(), generate_token()))
            .collect();

        let session = ProtocolSession::new(
            session_id.clone(),
            request,
            file_tokens.clone(),
            remote_address,
            now,
        );
        self.uploads.insert(session_id.clone(), session);
        (session_id, file_tokens)
    }

    pub fn create_download(
        &self,
        request: UploadRequest,
        remote_address: String,
        now: DateTime<Utc>,
    ) -> (String, HashMap<String, String>) {
        let session_id = Uuid::new_v4().to_string();
        let file_tokens: HashMap<String, String> = request
            .files
            .keys()
            .map(|file_id| (file_id.clone(), generate_token()))
            .collect();

        let session = ProtocolSession::new(
            session_id.clone(),
            request,
            file_tokens.clone(),
            remote_address,
            now,
        );
        self.downloads.insert(session_id.clone(), session);
        (session_id, file_tokens)
    }

    /// Validate `(sessionId, fileId, token)` against an upload
    /// session. Returns `true` iff the session is active, the file id
    /// is known, and the token matches (constant-time compare).
    pub fn validate_upload_token(&self, session_id: &str, file_id: &str, token: &str) -> bool {
        let Some(session) = self.uploads.get(session_id) else {
            return false;
        };
        if session.status != SessionStatus::Active {
            return false;
        }
        match session.file_tokens.get(file_id) {
            Some(expected) => crate::crypto::constant_time_eq(expected.as_bytes(), token.as_bytes()),
            None => false,
        }
    }

    /// Mark a file received; idempotent. Transitions the session to
    /// `Completed` exactly once, when every token has a matching
    /// received file.
    pub fn mark_file_received(&self, session_id: &str, file_id: &str) -> bool {
        let Some(mut session) = self.uploads.get_mut(session_id) else {
            return false;
        };
        if session.is_terminal() {
            return false;
        }
        session.received_files.insert(file_id.to_string());
        if session.received_files.len() >= session.file_tokens.len() {
            session.status = SessionStatus::Completed;
        }
        true
    }

    /// Record the chunk-engine/verification-manager session ids for
    /// one file of an in-progress upload, so the `upload` handler can
    /// look them up without holding a direct reference to either
    /// manager.
    pub fn attach_transfer_ids(
        &self,
        session_id: &str,
        file_id: &str,
        chunk_session_id: String,
        verify_session_id: String,
    ) {
        if let Some(mut session) = self.uploads.get_mut(session_id) {
            session
                .chunk_session_ids
                .insert(file_id.to_string(), chunk_session_id);
            session
                .verify_session_ids
                .insert(file_id.to_string(), verify_session_id);
        }
    }

    pub fn transfer_ids(&self, session_id: &str, file_id: &str) -> Option<(String, String)> {
        let session = self.uploads.get(session_id)?;
        let chunk_sid = session.chunk_session_ids.get(file_id)?.clone();
        let verify_sid = session.verify_session_ids.get(file_id)?.clone();
        Some((chunk_sid, verify_sid))
    }

    pub fn cancel_upload(&self, session_id: &str) -> bool {
        Self::cancel_in(&self.uploads, session_id)
    }

    pub fn cancel_download(&self, session_id: &str) -> bool {
        Self::cancel_in(&self.downloads, session_id)
    }

    fn cancel_in(map: &DashMap<String, ProtocolSession>, session_id: &str) -> bool {
        let Some(mut session) = map.get_mut(session_id) else {
            return false;
        };
        if session.is_terminal() {
            // Already terminal: cancel is idempotent, never resurrects.
            return session.status == SessionStatus::Cancelled;
        }
        session.status = SessionStatus::Cancelled;
        true
    }

    pub fn get_upload(&self, session_id: &str) -> Option<ProtocolSession> {
        self.uploads.get(session_id).map(|s| s.clone())
    }

    pub fn get_download(&self, session_id: &str) -> Option<ProtocolSession> {
        self.downloads.get(session_id).map(|s| s.clone())
    }

    /// Remove sessions past expiry or in a terminal state, from both
    /// maps. Runs on a 1-minute cadence per spec §4.D.
    pub fn sweep(&self, now: DateTime<Utc>) {
        Self::sweep_map(&self.uploads, now);
        Self::sweep_map(&self.downloads, now);
    }

    fn sweep_map(map: &DashMap<String, ProtocolSession>, now: DateTime<Utc>) {
        map.retain(|_, session| {
            !(session.is_expired(now)
                || matches!(
                    session.status,
                    SessionStatus::Completed | SessionStatus::Cancelled
                ))
        });
    }

    pub fn spawn_sweeper(self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep(Utc::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{DeviceInfo, FileMeta};

    fn sample_request(file_ids: &[&str]) -> UploadRequest {
        let mut files = HashMap::new();
        for id in file_ids {
            files.insert(
                id.to_string(),
                FileMeta {
                    file_name: format!("{id}.txt"),
                    size: 10_240,
                    file_type: "text/plain".to_string(),
                    last_modified: None,
                    preview: None,
                },
            );
        }
        UploadRequest {
            info: DeviceInfo {
                alias: "Alice".to_string(),
                version: "2.0".to_string(),
                device_model: Some("Laptop".to_string()),
                device_type: None,
                fingerprint: "fp".to_string(),
            },
            files,
            public_key: None,
        }
    }

    #[test]
    fn create_upload_allocates_one_token_per_file() {
        let store = SessionStore::new();
        let (_, tokens) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), Utc::now());
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn completes_when_all_files_received() {
        let store = SessionStore::new();
        let (sid, _tokens) =
            store.create_upload(sample_request(&["a", "b"]), "1.2.3.4".to_string(), Utc::now());

        assert!(store.mark_file_received(&sid, "a"));
        assert_eq!(store.get_upload(&sid).unwrap().status, SessionStatus::Active);

        assert!(store.mark_file_received(&sid, "b"));
        assert_eq!(
            store.get_upload(&sid).unwrap().status,
            SessionStatus::Completed
        );
    }

    #[test]
    fn mark_file_received_is_idempotent() {
        let store = SessionStore::new();
        let (sid, _) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), Utc::now());
        store.mark_file_received(&sid, "a");
        store.mark_file_received(&sid, "a");
        store.mark_file_received(&sid, "a");
        assert_eq!(
            store.get_upload(&sid).unwrap().status,
            SessionStatus::Completed
        );
    }

    #[test]
    fn cancel_is_terminal_and_idempotent() {
        let store = SessionStore::new();
        let (sid, _) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), Utc::now());
        assert!(store.cancel_upload(&sid));
        assert!(store.cancel_upload(&sid));
        assert_eq!(
            store.get_upload(&sid).unwrap().status,
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn cancel_does_not_resurrect_completed_session() {
        let store = SessionStore::new();
        let (sid, _) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), Utc::now());
        store.mark_file_received(&sid, "a");
        assert!(!store.cancel_upload(&sid));
        assert_eq!(
            store.get_upload(&sid).unwrap().status,
            SessionStatus::Completed
        );
    }

    #[test]
    fn token_validation_rejects_wrong_token() {
        let store = SessionStore::new();
        let (sid, tokens) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), Utc::now());
        assert!(store.validate_upload_token(&sid, "a", &tokens["a"]));
        assert!(!store.validate_upload_token(&sid, "a", "wrong-token"));
    }

    #[test]
    fn attach_and_fetch_transfer_ids() {
        let store = SessionStore::new();
        let (sid, _) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), Utc::now());
        assert!(store.transfer_ids(&sid, "a").is_none());

        store.attach_transfer_ids(&sid, "a", "chunk-1".to_string(), "verify-1".to_string());
        let (chunk_sid, verify_sid) = store.transfer_ids(&sid, "a").unwrap();
        assert_eq!(chunk_sid, "chunk-1");
        assert_eq!(verify_sid, "verify-1");
    }

    #[test]
    fn sweep_removes_expired_and_terminal_sessions() {
        let store = SessionStore::new();
        let now = Utc::now();
        let (sid, _) = store.create_upload(sample_request(&["a"]), "1.2.3.4".to_string(), now);
        store.cancel_upload(&sid);
        store.sweep(now);
        assert!(store.get_upload(&sid).is_none());
    }
}
