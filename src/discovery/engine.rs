//! UDP multicast announce/listen loop (spec §3, §4.E). LocalSend
//! peers announce themselves on a well-known multicast group; this
//! engine both broadcasts our own `Device` and folds incoming
//! announces into a [`PeerRegistry`], tolerating malformed or
//! self-originated datagrams without ever taking the task down.

use super::device::Device;
use super::registry::PeerRegistry;
use chrono::Utc;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 167);
pub const MULTICAST_PORT: u16 = 53317;
pub const MAX_DATAGRAM_LEN: usize = 8192;

pub struct DiscoveryEngine {
    socket: Arc<UdpSocket>,
    registry: PeerRegistry,
    self_fingerprint: String,
}

impl DiscoveryEngine {
    /// Binds the multicast socket and joins the LocalSend group on
    /// every available interface (`interface_addr`, typically
    /// `Ipv4Addr::UNSPECIFIED`).
    pub async fn bind(
        interface_addr: Ipv4Addr,
        registry: PeerRegistry,
        self_fingerprint: String,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)).await?;
        socket.join_multicast_v4(MULTICAST_GROUP, interface_addr)?;
        socket.set_multicast_loop_v4(false)?;
        Ok(Self {
            socket: Arc::new(socket),
            registry,
            self_fingerprint,
        })
    }

    pub async fn announce(&self, device: &Device) -> std::io::Result<()> {
        let payload = serde_json::to_vec(device)?;
        let dest = SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT));
        self.socket.send_to(&payload, dest).await?;
        Ok(())
    }

    /// Runs the receive loop until the socket errors out. Discards
    /// malformed datagrams and self-originated announces; never
    /// panics on bad input.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "discovery socket read failed, stopping listener");
                    return;
                }
            };

            let SocketAddr::V4(from_v4) = from else {
                continue;
            };

            let device: Device = match serde_json::from_slice(&buf[..len]) {
                Ok(device) => device,
                Err(err) => {
                    trace!(error = %err, peer = %from_v4, "discarding malformed discovery datagram");
                    continue;
                }
            };

            if device.fingerprint == self.self_fingerprint {
                continue;
            }

            let is_new = self
                .registry
                .observe(device.clone(), *from_v4.ip(), Utc::now());
            if is_new {
                debug!(alias = %device.alias, fingerprint = %device.fingerprint, peer = %from_v4, "discovered new peer");
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Protocol;

    fn sample_device(fp: &str) -> Device {
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
    fn device_round_trips_through_json() {
        let device = sample_device("fp-1");
        let bytes = serde_json::to_vec(&device).unwrap();
        let decoded: Device = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.fingerprint, device.fingerprint);
    }

    #[tokio::test]
    async fn two_engines_discover_each_other() {
        let registry_a = PeerRegistry::new();
        let registry_b = PeerRegistry::new();

        let engine_a = Arc::new(
            DiscoveryEngine::bind(Ipv4Addr::UNSPECIFIED, registry_a.clone(), "fp-a".to_string())
                .await
                .unwrap(),
        );
        let engine_b = Arc::new(
            DiscoveryEngine::bind(Ipv4Addr::UNSPECIFIED, registry_b.clone(), "fp-b".to_string())
                .await
                .unwrap(),
        );

        let handle_a = engine_a.clone().spawn();
        let handle_b = engine_b.clone().spawn();

        engine_a.announce(&sample_device("fp-a")).await.unwrap();
        engine_b.announce(&sample_device("fp-b")).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(registry_b.get("fp-a").is_some());
        assert!(registry_a.get("fp-b").is_some());

        handle_a.abort();
        handle_b.abort();
    }
}
