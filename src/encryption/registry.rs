//! Per-session encryption session registry (spec §4.I), keyed by the
//! same `sessionId` the upload protocol uses — an id-keyed map rather
//! than a back-pointer from `ProtocolSession`, matching the arena
//! pattern spec §9 calls for on cyclic ownership.

use super::session::EncryptionSession;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct EncryptionRegistry {
    sessions: Arc<DashMap<String, Arc<Mutex<EncryptionSession>>>>,
}

impl EncryptionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, session_id: String, session: EncryptionSession) {
        self.sessions.insert(session_id, Arc::new(Mutex::new(session)));
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<EncryptionSession>>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_returns_the_same_session() {
        let registry = EncryptionRegistry::new();
        registry.insert("sid".to_string(), EncryptionSession::new("sid", "peer.local:53317"));
        let session = registry.get("sid").unwrap();
        assert_eq!(session.lock().await.session_id, "sid");
    }

    #[test]
    fn missing_session_is_none() {
        let registry = EncryptionRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn remove_evicts_the_session() {
        let registry = EncryptionRegistry::new();
        registry.insert("sid".to_string(), EncryptionSession::new("sid", "peer.local:53317"));
        registry.remove("sid");
        assert!(registry.get("sid").is_none());
    }
}
