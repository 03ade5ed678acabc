//! Runtime configuration, built at startup and propagated explicitly
//! (no ambient statics). Loaded from `Localtalk.toml`, then `LOCALTALK_*`
//! environment variables, then built-in defaults, via `figment`.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Chunk-transfer sizing. Local and tunnel-style deployments favor
/// different tradeoffs between per-request overhead and head-of-line
/// retry cost.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub concurrency: usize,
}

impl TransferConfig {
    pub fn local() -> Self {
        Self {
            chunk_size: 10 * 1024 * 1024,
            concurrency: 8,
        }
    }

    pub fn tunnel() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            concurrency: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_requests_per_minute: u32,
    pub threat_cache_expiry_minutes: u32,
    pub enable_sql_injection_detection: bool,
    pub enable_xss_detection: bool,
    pub enable_path_traversal_detection: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 100,
            threat_cache_expiry_minutes: 60,
            enable_sql_injection_detection: true,
            enable_xss_detection: true,
            enable_path_traversal_detection: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub interface_cache_timeout_secs: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface_cache_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FirewallConfig {
    pub enable_upnp: bool,
    pub enable_nat_pmp: bool,
    pub enable_pcp: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enable_upnp: false,
            enable_nat_pmp: false,
            enable_pcp: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub min_level: String,
    pub console: bool,
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            min_level: "info".to_string(),
            console: true,
            debug: false,
        }
    }
}

/// Top-level configuration. Constructed once at startup (see
/// `Config::load`) and handed to `Runtime::new` — nothing below reads
/// from process-global statics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub alias: String,
    pub device_model: String,
    pub port: u16,
    pub address: Ipv4Addr,
    pub required_pin: Option<String>,
    pub enable_https: bool,
    pub security: SecurityConfig,
    pub network: NetworkConfig,
    pub firewall: FirewallConfig,
    pub logging: LoggingConfig,
    pub transfer: TransferConfig,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alias: "localtalk".to_string(),
            device_model: "Generic Device".to_string(),
            port: 53317,
            address: Ipv4Addr::new(224, 0, 0, 167),
            required_pin: None,
            enable_https: false,
            security: SecurityConfig::default(),
            network: NetworkConfig::default(),
            firewall: FirewallConfig::default(),
            logging: LoggingConfig::default(),
            transfer: TransferConfig::local(),
            request_timeout_secs: 30,
        }
    }
}

/// Errors surfaced while assembling configuration; callers map this to
/// exit code 2 (configuration invalid) per the CLI contract.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from `path` (if present), environment
    /// variables prefixed `LOCALTALK_`, and defaults, in increasing
    /// precedence.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                figment = figment.merge(Toml::file(path));
            }
        }
        figment = figment.merge(Env::prefixed("LOCALTALK_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be nonzero".to_string()));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be nonzero".to_string(),
            ));
        }
        if self.transfer.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "transfer.concurrency must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = Config::load(Some("/nonexistent/Localtalk.toml")).unwrap();
        assert_eq!(config.port, 53317);
        assert_eq!(config.address, Ipv4Addr::new(224, 0, 0, 167));
    }
}
