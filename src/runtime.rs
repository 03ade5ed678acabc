//! Top-level process lifecycle (spec §5, §9): config → logging →
//! crypto/identity → discovery → HTTP server, shutdown in reverse with
//! a bounded deadline. Generalized from the teacher's
//! `server::api::ServerInstance` (one struct bundling the router, a
//! display name, and a progress channel) into an explicit `Runtime`
//! that owns every shared store — spec §9's "no singletons" note.

use crate::chunk::{ChunkEngine, RetryPolicy};
use crate::config::Config;
use crate::crypto::certificate_fingerprint;
use crate::discovery::{DiscoveryEngine, PeerRegistry};
use crate::encryption::EncryptionRegistry;
use crate::http::{self, AppState};
use crate::security::{ReplayDetector, SecurityAnalyzer};
use crate::session::SessionStore;
use crate::settings::Settings;
use crate::verify::VerificationManager;
use chrono::Utc;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const REPLAY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const ANALYZER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("configuration invalid: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
    #[error("could not persist settings: {0}")]
    Settings(#[from] crate::settings::SettingsError),
    #[error("startup io error: {0}")]
    Io(std::io::Error),
}

/// Owns every process-global store and the sweepers that keep them
/// bounded. Constructed once at startup; `run` drives it until
/// shutdown.
pub struct Runtime {
    config: Arc<Config>,
    state: AppState,
    discovery: Arc<DiscoveryEngine>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Initializes tracing, loads/creates device identity, binds
    /// discovery, and assembles the HTTP router. Does not bind the TCP
    /// listener yet — that happens in `run`, so bind failures are
    /// reported distinctly from earlier startup failures (exit code 3
    /// vs 1/2 per spec §6).
    pub async fn new(config: Config) -> Result<Self, RuntimeError> {
        install_logging(&config);

        let settings_dir = Settings::data_dir().unwrap_or_else(|_| std::env::temp_dir().join("localtalk"));
        let mut settings = Settings::load(&settings_dir).unwrap_or_default();
        if settings.is_first_run {
            settings.device_name = config.alias.clone();
            settings.device_model = config.device_model.clone();
            settings.is_first_run = false;
            settings.save(&settings_dir)?;
        }

        let fingerprint = device_fingerprint(&config);

        let config = Arc::new(config);
        let sessions = SessionStore::new();
        let registry = PeerRegistry::new();
        let analyzer = SecurityAnalyzer::new(config.security.max_requests_per_minute).with_detectors(
            config.security.enable_sql_injection_detection,
            config.security.enable_xss_detection,
            config.security.enable_path_traversal_detection,
        );
        let replay = ReplayDetector::new();
        let storage_dir = settings_dir.join("received");
        std::fs::create_dir_all(&storage_dir).map_err(RuntimeError::Io)?;

        let chunk_engine = ChunkEngine::new(config.transfer.concurrency, RetryPolicy::default());
        let verify = VerificationManager::new();
        let encryption = EncryptionRegistry::new();

        let state = AppState::new(
            config.clone(),
            sessions.clone(),
            registry.clone(),
            analyzer.clone(),
            replay.clone(),
            fingerprint.clone(),
            storage_dir,
            chunk_engine,
            verify,
            encryption,
        );

        let discovery = Arc::new(
            DiscoveryEngine::bind(Ipv4Addr::UNSPECIFIED, registry, fingerprint)
                .await
                .map_err(RuntimeError::Bind)?,
        );

        let sweepers = vec![
            sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL),
            Arc::new(replay).spawn_sweeper(REPLAY_SWEEP_INTERVAL),
            Arc::new(analyzer).spawn_sweeper(
                ANALYZER_SWEEP_INTERVAL,
                chrono::Duration::minutes(config.security.threat_cache_expiry_minutes as i64),
            ),
        ];

        Ok(Self {
            config,
            state,
            discovery,
            sweepers,
        })
    }

    /// Binds the TCP listener and serves until `shutdown_signal`
    /// resolves (typically ctrl-c), then cancels outstanding sessions
    /// and tears down sweepers within [`SHUTDOWN_DEADLINE`].
    pub async fn run(self) -> Result<(), RuntimeError> {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(RuntimeError::Bind)?;

        info!(%addr, fingerprint = %self.state.fingerprint, "localtalk runtime starting");

        self.discovery
            .announce(&self.state.self_device())
            .await
            .map_err(RuntimeError::Io)?;
        let discovery_task = tokio::spawn(self.discovery.clone().run());

        let sessions = self.state.sessions.clone();
        let router = http::build(self.state.clone());

        let serve_result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        discovery_task.abort();
        for sweeper in self.sweepers {
            sweeper.abort();
        }

        let cancel_deadline = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
            sessions.sweep(Utc::now());
        });
        if cancel_deadline.await.is_err() {
            warn!("shutdown deadline exceeded while finalizing sessions");
        }

        serve_result.map_err(RuntimeError::Serve)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn device_fingerprint(config: &Config) -> String {
    if config.enable_https {
        // A real deployment binds a persistent certificate and
        // fingerprints it; absent one here, fall back to an opaque
        // identity the way unauthenticated HTTP peers already use
        // (spec §9 note 4 — certificate provisioning is an external
        // collaborator, not reimplemented here).
        certificate_fingerprint(config.alias.as_bytes())
    } else {
        crate::crypto::fingerprint::generate_device_fingerprint()
    }
}

fn install_logging(config: &Config) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(&config.logging.min_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(config.logging.debug);
    let _ = if config.logging.console {
        subscriber.try_init()
    } else {
        subscriber.with_writer(std::io::sink).try_init()
    };
}
