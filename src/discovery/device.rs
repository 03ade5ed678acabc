//! The announce payload peers exchange over multicast (spec §3, §4.E).

use crate::session::{DeviceInfo, DeviceType, Protocol};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    pub alias: String,
    pub version: String,
    #[serde(rename = "deviceModel")]
    pub device_model: Option<String>,
    #[serde(rename = "deviceType")]
    pub device_type: Option<DeviceType>,
    pub fingerprint: String,
    pub port: u16,
    pub protocol: Protocol,
    pub download: bool,
    /// `true` when this frame is an active announce, `false` when it
    /// is a response to someone else's announce. Mirrors the
    /// `announce` boolean LocalSend sends over the wire.
    pub announce: bool,
}

impl Device {
    pub fn from_info(
        info: &DeviceInfo,
        port: u16,
        protocol: Protocol,
        download: bool,
        announce: bool,
    ) -> Self {
        Self {
            alias: info.alias.clone(),
            version: info.version.clone(),
            device_model: info.device_model.clone(),
            device_type: info.device_type.clone(),
            fingerprint: info.fingerprint.clone(),
            port,
            protocol,
            download,
            announce,
        }
    }
}

// Two devices are the same peer iff their fingerprints match, regardless
// of which address or alias they're currently announcing from.
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}
impl Eq for Device {}

#[derive(Clone, Debug)]
pub struct AnnouncedPeer {
    pub device: Device,
    pub address: Ipv4Addr,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}
