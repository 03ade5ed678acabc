//! Tracks currently-visible peers, deduplicated by fingerprint.

use super::device::{AnnouncedPeer, Device};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Peers drop off the registry if they haven't been re-announced
/// within this window.
pub const PEER_TIMEOUT_SECS: i64 = 30;

#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<String, AnnouncedPeer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh a peer announce. Returns `true` if this
    /// fingerprint is newly seen.
    pub fn observe(&self, device: Device, address: Ipv4Addr, now: DateTime<Utc>) -> bool {
        let is_new = !self.peers.contains_key(&device.fingerprint);
        self.peers.insert(
            device.fingerprint.clone(),
            AnnouncedPeer {
                device,
                address,
                last_seen: now,
            },
        );
        is_new
    }

    pub fn remove(&self, fingerprint: &str) -> bool {
        self.peers.remove(fingerprint).is_some()
    }

    pub fn get(&self, fingerprint: &str) -> Option<AnnouncedPeer> {
        self.peers.get(fingerprint).map(|p| p.clone())
    }

    /// Snapshot of peers, in first-seen order isn't preserved by
    /// `DashMap` iteration order; callers needing stable order should
    /// sort by `last_seen` or `device.fingerprint`.
    pub fn snapshot(&self) -> Vec<AnnouncedPeer> {
        self.peers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        self.peers
            .retain(|_, peer| (now - peer.last_seen).num_seconds() < PEER_TIMEOUT_SECS);
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
    use crate::session::Protocol;

    fn device(fp: &str) -> Device {
        Device {
            alias: "peer".to_string(),
            version: "2.0".to_string(),
            device_model: None,
            device_type: None,
            fingerprint: fp.to_string(),
            port: 53317,
            protocol: Protocol::Http,
            download: false,
            announce: true,
        }
    }

    #[test]
    fn observing_new_fingerprint_reports_new() {
        let registry = PeerRegistry::new();
        let now = Utc::now();
        assert!(registry.observe(device("fp-1"), Ipv4Addr::LOCALHOST, now));
        assert!(!registry.observe(device("fp-1"), Ipv4Addr::LOCALHOST, now));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn re_announce_from_new_address_updates_in_place() {
        let registry = PeerRegistry::new();
        let now = Utc::now();
        registry.observe(device("fp-1"), Ipv4Addr::new(192, 168, 1, 10), now);
        registry.observe(device("fp-1"), Ipv4Addr::new(192, 168, 1, 20), now);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("fp-1").unwrap().address,
            Ipv4Addr::new(192, 168, 1, 20)
        );
    }

    #[test]
    fn sweep_drops_stale_peers() {
        let registry = PeerRegistry::new();
        let now = Utc::now();
        registry.observe(device("fp-1"), Ipv4Addr::LOCALHOST, now - chrono::Duration::seconds(60));
        registry.sweep(now);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_drops_a_peer_immediately() {
        let registry = PeerRegistry::new();
        let now = Utc::now();
        registry.observe(device("fp-1"), Ipv4Addr::LOCALHOST, now);
        assert!(registry.remove("fp-1"));
        assert!(registry.is_empty());
    }
}
