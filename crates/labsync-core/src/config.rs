//! Engine configuration.
//!
//! Read from `labsync.toml` in the data directory. Every section and field
//! has a default, so a missing file or an empty one is valid.
//!
//! ## Environment Variables
//!
//! - `LABSYNC_ENCRYPTION_KEY` - base64 store encryption key
//! - `LABSYNC_REMOTE_URL` - remote store base URL
//! - `LABSYNC_API_TOKEN` - bearer token for the remote store

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::StoreCrypto;
use crate::error::SyncError;
use crate::storage::{BackendKind, PlatformCapabilities};

/// Configuration file name inside the data directory
pub const CONFIG_FILE_NAME: &str = "labsync.toml";

pub const ENV_ENCRYPTION_KEY: &str = "LABSYNC_ENCRYPTION_KEY";
pub const ENV_REMOTE_URL: &str = "LABSYNC_REMOTE_URL";
pub const ENV_API_TOKEN: &str = "LABSYNC_API_TOKEN";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabSyncConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub remote: RemoteSettings,
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: BackendKind,
    /// Values at least this many bytes are compressed; absent disables
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: Option<usize>,
    /// Base64-encoded 32-byte key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

fn default_compression_threshold() -> Option<usize> {
    Some(1024)
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            compression_threshold: default_compression_threshold(),
            encryption_key: None,
        }
    }
}

/// `[sync]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Seconds between timer-triggered passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Deadline for each remote call, in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_pass: usize,
    /// Collections pulled at the same time
    #[serde(default = "default_pull_concurrency")]
    pub pull_concurrency: usize,
    /// Collections mirrored into the cache
    #[serde(default)]
    pub collections: Vec<String>,
    /// Relationship fields lifted out of documents, per collection
    #[serde(default)]
    pub relations: HashMap<String, Vec<String>>,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> usize {
    100
}

fn default_max_pages() -> usize {
    10
}

fn default_pull_concurrency() -> usize {
    4
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            remote_timeout_ms: default_remote_timeout_ms(),
            page_size: default_page_size(),
            max_pages_per_pass: default_max_pages(),
            pull_concurrency: default_pull_concurrency(),
            collections: Vec::new(),
            relations: HashMap::new(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Reject values that would stall or spin the sync loop
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.interval_secs == 0 {
            return Err(SyncError::Config("sync.interval_secs must be > 0".into()));
        }
        if self.remote_timeout_ms == 0 {
            return Err(SyncError::Config("sync.remote_timeout_ms must be > 0".into()));
        }
        if self.page_size == 0 {
            return Err(SyncError::Config("sync.page_size must be > 0".into()));
        }
        if self.max_pages_per_pass == 0 {
            return Err(SyncError::Config("sync.max_pages_per_pass must be > 0".into()));
        }
        if self.pull_concurrency == 0 {
            return Err(SyncError::Config("sync.pull_concurrency must be > 0".into()));
        }
        if let Some(bad) = self.collections.iter().find(|c| c.is_empty() || c.contains('/')) {
            return Err(SyncError::Config(format!(
                "Invalid collection name '{}' in sync.collections",
                bad
            )));
        }
        Ok(())
    }
}

/// `[remote]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl LabSyncConfig {
    /// Path of the config file inside `data_dir`
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE_NAME)
    }

    /// Load `path`, falling back to defaults when it does not exist, then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        config.sync.validate()?;
        Ok(config)
    }

    /// Load `path` without consulting the environment
    pub fn load_file(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("Failed to encode config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `LABSYNC_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(key) = non_empty(ENV_ENCRYPTION_KEY) {
            self.storage.encryption_key = Some(key);
        }
        if let Some(url) = non_empty(ENV_REMOTE_URL) {
            self.remote.url = Some(url);
        }
        if let Some(token) = non_empty(ENV_API_TOKEN) {
            self.remote.api_token = Some(token);
        }
    }

    /// Storage capabilities for a store rooted at `data_dir`
    pub fn to_capabilities(&self, data_dir: &Path) -> Result<PlatformCapabilities, SyncError> {
        let key = self
            .storage
            .encryption_key
            .as_deref()
            .map(StoreCrypto::key_from_base64)
            .transpose()?;

        let mut caps = match self.storage.backend {
            BackendKind::Embedded => PlatformCapabilities::embedded(data_dir),
            BackendKind::EncryptedFile => {
                let key = key.ok_or_else(|| {
                    SyncError::Config(format!(
                        "backend 'encrypted-file' needs storage.encryption_key or {}",
                        ENV_ENCRYPTION_KEY
                    ))
                })?;
                PlatformCapabilities::encrypted_file(data_dir, key)
            }
            BackendKind::Memory => PlatformCapabilities::in_memory(),
        };
        if let Some(key) = key {
            caps = caps.with_encryption_key(key);
        }
        if let Some(threshold) = self.storage.compression_threshold {
            caps = caps.with_compression_threshold(threshold);
        }
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = LabSyncConfig::load_file(&LabSyncConfig::path_in(temp.path())).unwrap();
        assert_eq!(config, LabSyncConfig::default());
        assert_eq!(config.sync.interval(), Duration::from_secs(60));
        assert_eq!(config.storage.compression_threshold, Some(1024));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = LabSyncConfig::path_in(temp.path());
        std::fs::write(
            &path,
            r#"
[sync]
page_size = 25
collections = ["patients", "samples"]

[sync.relations]
samples = ["patient_id"]
"#,
        )
        .unwrap();

        let config = LabSyncConfig::load_file(&path).unwrap();
        assert_eq!(config.sync.page_size, 25);
        assert_eq!(config.sync.collections, vec!["patients", "samples"]);
        assert_eq!(config.sync.relations["samples"], vec!["patient_id"]);
        assert_eq!(config.sync.max_pages_per_pass, 10);
        assert_eq!(config.storage.backend, BackendKind::Embedded);
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = LabSyncConfig::default();
        config.storage.backend = BackendKind::EncryptedFile;
        config.remote.url = Some("https://lab.example.com/api".to_string());
        config.save(&path).unwrap();

        assert_eq!(LabSyncConfig::load_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[sync\npage_size = ").unwrap();
        assert!(matches!(
            LabSyncConfig::load_file(&path),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LabSyncConfig::default();
        config.remote.url = Some("http://from-file".to_string());

        config.apply_overrides_from(|name| match name {
            ENV_REMOTE_URL => Some("http://from-env".to_string()),
            ENV_API_TOKEN => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.remote.url.as_deref(), Some("http://from-env"));
        assert!(config.remote.api_token.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut settings = SyncSettings::default();
        assert!(settings.validate().is_ok());
        settings.page_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = SyncSettings::default();
        settings.collections = vec!["bad/name".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_to_capabilities() {
        let temp = TempDir::new().unwrap();
        let mut config = LabSyncConfig::default();
        let caps = config.to_capabilities(temp.path()).unwrap();
        assert_eq!(caps.backend, BackendKind::Embedded);
        assert!(caps.encryption_key.is_none());

        config.storage.backend = BackendKind::EncryptedFile;
        assert!(matches!(
            config.to_capabilities(temp.path()),
            Err(SyncError::Config(_))
        ));

        let key = StoreCrypto::generate_key();
        config.storage.encryption_key = Some(StoreCrypto::key_to_base64(&key));
        let caps = config.to_capabilities(temp.path()).unwrap();
        assert_eq!(caps.encryption_key, Some(key));
    }
}
