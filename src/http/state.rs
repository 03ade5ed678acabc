//! Shared application state handed to every route handler (spec §9's
//! "no singletons" design note): everything a handler needs is
//! reached through this struct rather than through ambient statics.

use crate::chunk::ChunkEngine;
use crate::config::Config;
use crate::discovery::{Device, PeerRegistry};
use crate::encryption::EncryptionRegistry;
use crate::security::{ReplayDetector, SecurityAnalyzer};
use crate::session::{DeviceType, Protocol, SessionStore};
use crate::verify::VerificationManager;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub registry: PeerRegistry,
    pub analyzer: SecurityAnalyzer,
    pub replay: ReplayDetector,
    pub fingerprint: String,
    pub storage_dir: PathBuf,
    pub chunk_engine: ChunkEngine,
    pub verify: VerificationManager,
    pub encryption: EncryptionRegistry,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        sessions: SessionStore,
        registry: PeerRegistry,
        analyzer: SecurityAnalyzer,
        replay: ReplayDetector,
        fingerprint: String,
        storage_dir: PathBuf,
        chunk_engine: ChunkEngine,
        verify: VerificationManager,
        encryption: EncryptionRegistry,
    ) -> Self {
        Self {
            config,
            sessions,
            registry,
            analyzer,
            replay,
            fingerprint,
            storage_dir,
            chunk_engine,
            verify,
            encryption,
        }
    }

    /// The `Device` this node advertises for `info`/`register`/discovery.
    pub fn self_device(&self) -> Device {
        Device {
            alias: self.config.alias.clone(),
            version: "2.0".to_string(),
            device_model: Some(self.config.device_model.clone()),
            device_type: Some(DeviceType::Desktop),
            fingerprint: self.fingerprint.clone(),
            port: self.config.port,
            protocol: if self.config.enable_https {
                Protocol::Https
            } else {
                Protocol::Http
            },
            download: true,
            announce: true,
        }
    }
}
