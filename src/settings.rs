//! Persisted, non-transfer state (spec §6): device identity and the
//! trusted-certificate map, stored as JSON under the platform data
//! directory via the `directories` crate. Separate from `Config`
//! (which is reloaded from file/env/defaults on every startup) because
//! this state is mutated at runtime and must survive restarts on its
//! own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not determine platform data directory")]
    NoDataDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub device_name: String,
    pub device_model: String,
    pub is_first_run: bool,
    /// fingerprint-by-name, round-tripped to `name=fp;name=fp;...` for
    /// anything that still needs the flat string form.
    pub trusted_certificates: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: "localtalk".to_string(),
            device_model: "Generic Device".to_string(),
            is_first_run: true,
            trusted_certificates: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn data_dir() -> Result<PathBuf, SettingsError> {
        directories::ProjectDirs::from("dev", "localtalk", "localtalk")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(SettingsError::NoDataDir)
    }

    fn file_path(dir: &Path) -> PathBuf {
        dir.join("settings.json")
    }

    /// Load settings from `dir`, or return defaults if the file
    /// doesn't exist yet (first run).
    pub fn load(dir: &Path) -> Result<Self, SettingsError> {
        let path = Self::file_path(dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, dir: &Path) -> Result<(), SettingsError> {
        std::fs::create_dir_all(dir)?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::file_path(dir), raw)?;
        Ok(())
    }

    pub fn trusted_certificates_string(&self) -> String {
        let mut entries: Vec<String> = self
            .trusted_certificates
            .iter()
            .map(|(name, fp)| format!("{name}={fp}"))
            .collect();
        entries.sort();
        entries.join(";")
    }

    pub fn parse_trusted_certificates(raw: &str) -> HashMap<String, String> {
        raw.split(';')
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| entry.split_once('='))
            .map(|(name, fp)| (name.to_string(), fp.to_string()))
            .collect()
    }

    pub fn trust_certificate(&mut self, name: impl Into<String>, fingerprint: impl Into<String>) {
        self.trusted_certificates.insert(name.into(), fingerprint.into());
    }

    pub fn is_trusted(&self, name: &str, fingerprint: &str) -> bool {
        self.trusted_certificates
            .get(name)
            .map(|known| crate::crypto::constant_time_eq(known.as_bytes(), fingerprint.as_bytes()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert!(settings.is_first_run);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.device_name = "Alice's Laptop".to_string();
        settings.is_first_run = false;
        settings.trust_certificate("bob.local", "AABBCC");
        settings.save(dir.path()).unwrap();

        let reloaded = Settings::load(dir.path()).unwrap();
        assert_eq!(reloaded.device_name, "Alice's Laptop");
        assert!(!reloaded.is_first_run);
        assert!(reloaded.is_trusted("bob.local", "AABBCC"));
    }

    #[test]
    fn trusted_certificates_string_round_trips() {
        let mut settings = Settings::default();
        settings.trust_certificate("alice", "111");
        settings.trust_certificate("bob", "222");
        let raw = settings.trusted_certificates_string();
        let parsed = Settings::parse_trusted_certificates(&raw);
        assert_eq!(parsed.get("alice"), Some(&"111".to_string()));
        assert_eq!(parsed.get("bob"), Some(&"222".to_string()));
    }

    #[test]
    fn is_trusted_rejects_unknown_name() {
        let settings = Settings::default();
        assert!(!settings.is_trusted("nobody", "anything"));
    }
}
