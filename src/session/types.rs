//! Upload/download protocol session types (spec §3).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SESSION_TTL: Duration = Duration::hours(1);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    #[serde(rename = "mobile")]
    Mobile,
    #[serde(rename = "desktop")]
    Desktop,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Protocol {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "https")]
    Https,
}

/// Originator info block carried in `UploadRequest` and mirrored by
/// `info`/`register` responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub alias: String,
    pub version: String,
    #[serde(rename = "deviceModel")]
    pub device_model: Option<String>,
    #[serde(rename = "deviceType")]
    pub device_type: Option<DeviceType>,
    pub fingerprint: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub size: u64,
    #[serde(rename = "fileType")]
    pub file_type: String,
    #[serde(rename = "lastModified")]
    pub last_modified: Option<i64>,
    pub preview: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    pub info: DeviceInfo,
    pub files: HashMap<String, FileMeta>,
    /// SPKI-encoded ECDH public key (spec §4.I), present when the
    /// sender wants an encrypted transfer. The responder's own public
    /// key comes back in the `prepare-upload` response, completing the
    /// handshake in this single round trip.
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
    Expired,
    Error,
}

/// A `prepare-upload`/`prepare-download` negotiated session. Upload
/// and download sessions share this shape; direction is tracked
/// separately by which `SessionStore` map holds the id (spec §3).
#[derive(Clone, Debug)]
pub struct ProtocolSession {
    pub session_id: String,
    pub request: UploadRequest,
    pub file_tokens: HashMap<String, String>,
    pub remote_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub received_files: HashSet<String>,
    /// `fileId` -> chunk engine transfer session id (spec §4.H),
    /// bridging this protocol session to its per-file `ChunkEngine`
    /// state by id rather than a back-pointer.
    pub chunk_session_ids: HashMap<String, String>,
    /// `fileId` -> verification manager session id (spec §4.J).
    pub verify_session_ids: HashMap<String, String>,
}

impl ProtocolSession {
    pub fn new(
        session_id: String,
        request: UploadRequest,
        file_tokens: HashMap<String, String>,
        remote_address: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            request,
            file_tokens,
            remote_address,
            created_at,
            expires_at: created_at + SESSION_TTL,
            status: SessionStatus::Active,
            received_files: HashSet::new(),
            chunk_session_ids: HashMap::new(),
            verify_session_ids: HashMap::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Expired
        )
    }
}
