//! Local persistent store.
//!
//! A tagged key/value store over a pluggable [`StorageBackend`]:
//! - `redb` embedded database (default on devices with a filesystem)
//! - encrypted file-per-key storage
//! - ephemeral memory (browser-storage stand-in, tests)
//!
//! Every value is wrapped in a [`StoredEntry`] (key + tags + JSON value)
//! and framed by [`ValueCodec`], which applies compression and encryption
//! transparently. Callers only ever see decoded JSON.
//!
//! The queue, cache and metadata live in disjoint key namespaces of the
//! same store.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::SyncError;

mod backend;
mod codec;
mod file_backend;
mod redb_backend;

pub use backend::{MemoryBackend, StorageBackend};
pub use codec::{ValueCodec, FRAME_VERSION};
pub use file_backend::FileBackend;
pub use redb_backend::RedbBackend;

/// Database file name inside the data directory
pub const DB_FILE_NAME: &str = "labsync.redb";

/// Directory name for the file backend inside the data directory
pub const FILE_STORE_DIR: &str = "store";

/// Which backend a platform provides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// redb database file
    #[default]
    Embedded,
    /// One encrypted file per key
    EncryptedFile,
    /// Process memory only
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Embedded => write!(f, "embedded"),
            BackendKind::EncryptedFile => write!(f, "encrypted-file"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Storage capabilities of the host platform, injected at construction.
#[derive(Clone)]
pub struct PlatformCapabilities {
    pub backend: BackendKind,
    /// Required for file-based backends
    pub data_dir: Option<PathBuf>,
    pub encryption_key: Option<[u8; 32]>,
    /// Values at least this large are zstd-compressed
    pub compression_threshold: Option<usize>,
}

impl std::fmt::Debug for PlatformCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCapabilities")
            .field("backend", &self.backend)
            .field("data_dir", &self.data_dir)
            .field("encrypted", &self.encryption_key.is_some())
            .field("compression_threshold", &self.compression_threshold)
            .finish()
    }
}

impl PlatformCapabilities {
    /// redb database under `data_dir`
    pub fn embedded(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Embedded,
            data_dir: Some(data_dir.into()),
            encryption_key: None,
            compression_threshold: None,
        }
    }

    /// Encrypted file-per-key storage under `data_dir`
    pub fn encrypted_file(data_dir: impl Into<PathBuf>, key: [u8; 32]) -> Self {
        Self {
            backend: BackendKind::EncryptedFile,
            data_dir: Some(data_dir.into()),
            encryption_key: Some(key),
            compression_threshold: None,
        }
    }

    /// Memory-only storage
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_dir: None,
            encryption_key: None,
            compression_threshold: None,
        }
    }

    pub fn with_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = Some(threshold);
        self
    }

    fn codec(&self) -> ValueCodec {
        ValueCodec::new(self.encryption_key.as_ref(), self.compression_threshold)
    }

    fn require_dir(&self) -> Result<&PathBuf, SyncError> {
        self.data_dir.as_ref().ok_or_else(|| {
            SyncError::Config(format!("Backend '{}' requires a data directory", self.backend))
        })
    }

    fn open_backend(&self) -> Result<Arc<dyn StorageBackend>, SyncError> {
        match self.backend {
            BackendKind::Embedded => {
                let path = self.require_dir()?.join(DB_FILE_NAME);
                Ok(Arc::new(RedbBackend::open(path)?))
            }
            BackendKind::EncryptedFile => {
                let key = self.encryption_key.as_ref().ok_or_else(|| {
                    SyncError::Config(
                        "Encrypted file storage requires an encryption key".to_string(),
                    )
                })?;
                let dir = self.require_dir()?.join(FILE_STORE_DIR);
                Ok(Arc::new(FileBackend::open_sealed(dir, key)?))
            }
            BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        }
    }
}

/// Result of a lenient prefix scan
#[derive(Debug, Default)]
pub struct Scan {
    /// Decoded entries accepted by the predicate, in key order
    pub entries: Vec<StoredEntry>,
    /// Keys whose frames could not be decoded, with the reason
    pub corrupt: Vec<(String, SyncError)>,
}

/// A decoded store entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub value: Value,
}

impl StoredEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Deserialize the value into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| SyncError::Serialization(format!("{}: {}", self.key, e)))
    }
}

enum BackendSource {
    /// Opened from capabilities on each `initialize`
    Platform(PlatformCapabilities),
    /// Supplied by the caller and kept across shutdown/initialize cycles
    Provided(Arc<dyn StorageBackend>),
}

struct StoreInner {
    source: BackendSource,
    codec: ValueCodec,
    backend: RwLock<Option<Arc<dyn StorageBackend>>>,
}

/// Tagged key/value store with transparent encryption and compression
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    /// Create a store for the given platform. Call [`LocalStore::initialize`]
    /// before use.
    pub fn new(capabilities: PlatformCapabilities) -> Self {
        let codec = capabilities.codec();
        // Memory contents must survive a shutdown/initialize cycle
        let source = if capabilities.backend == BackendKind::Memory {
            BackendSource::Provided(Arc::new(MemoryBackend::new()))
        } else {
            BackendSource::Platform(capabilities)
        };
        Self {
            inner: Arc::new(StoreInner {
                source,
                codec,
                backend: RwLock::new(None),
            }),
        }
    }

    /// Create a store over an existing backend
    pub fn with_backend(backend: Arc<dyn StorageBackend>, codec: ValueCodec) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source: BackendSource::Provided(backend),
                codec,
                backend: RwLock::new(None),
            }),
        }
    }

    /// Acquire the backend. Idempotent.
    pub fn initialize(&self) -> Result<(), SyncError> {
        let mut slot = self.inner.backend.write();
        if slot.is_some() {
            return Ok(());
        }
        let backend = match &self.inner.source {
            BackendSource::Platform(caps) => caps.open_backend()?,
            BackendSource::Provided(backend) => backend.clone(),
        };
        info!(
            backend = backend.name(),
            encrypted = self.inner.codec.is_encrypting(),
            "Local store initialized"
        );
        *slot = Some(backend);
        Ok(())
    }

    /// Release the backend. Subsequent calls fail with
    /// [`SyncError::StorageUnavailable`] until re-initialized.
    pub fn shutdown(&self) {
        if let Some(backend) = self.inner.backend.write().take() {
            debug!(backend = backend.name(), "Local store released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.backend.read().is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.inner.backend.read().as_ref().map(|b| b.name())
    }

    fn backend(&self) -> Result<Arc<dyn StorageBackend>, SyncError> {
        self.inner.backend.read().clone().ok_or_else(|| {
            SyncError::StorageUnavailable("local store is not initialized".to_string())
        })
    }

    fn decode_frame(&self, key: &str, frame: &[u8]) -> Result<StoredEntry, SyncError> {
        let bytes = self.inner.codec.decode(frame)?;
        let entry: StoredEntry = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Serialization(format!("{}: {}", key, e)))?;
        Ok(entry)
    }

    /// Load and decode the entry stored under `key`
    pub fn get_entry(&self, key: &str) -> Result<Option<StoredEntry>, SyncError> {
        let backend = self.backend()?;
        match backend.get(key)? {
            Some(frame) => Ok(Some(self.decode_frame(key, &frame)?)),
            None => Ok(None),
        }
    }

    /// Load a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SyncError> {
        match self.get_entry(key)? {
            Some(entry) => Ok(Some(entry.decode()?)),
            None => Ok(None),
        }
    }

    /// Store a value under `key`, replacing any previous entry whole.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, tags: &[String]) -> Result<(), SyncError> {
        let backend = self.backend()?;
        let entry = StoredEntry {
            key: key.to_string(),
            tags: tags.to_vec(),
            value: serde_json::to_value(value)?,
        };
        let bytes = serde_json::to_vec(&entry)?;
        let frame = self.inner.codec.encode(&bytes)?;
        backend.put(key, &frame)
    }

    pub fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.backend()?.remove(key)
    }

    /// All entries under `prefix` accepted by `predicate`, in key order
    pub fn query<F>(&self, prefix: &str, predicate: F) -> Result<Vec<StoredEntry>, SyncError>
    where
        F: Fn(&StoredEntry) -> bool,
    {
        let backend = self.backend()?;
        let mut matches = Vec::new();
        for (key, frame) in backend.scan_prefix(prefix)? {
            let entry = self.decode_frame(&key, &frame)?;
            if predicate(&entry) {
                matches.push(entry);
            }
        }
        Ok(matches)
    }

    /// Like [`LocalStore::query`], but an entry that fails to decode is
    /// set aside in [`Scan::corrupt`] instead of failing the whole scan.
    pub fn scan<F>(&self, prefix: &str, predicate: F) -> Result<Scan, SyncError>
    where
        F: Fn(&StoredEntry) -> bool,
    {
        let backend = self.backend()?;
        let mut scan = Scan::default();
        for (key, frame) in backend.scan_prefix(prefix)? {
            match self.decode_frame(&key, &frame) {
                Ok(entry) if predicate(&entry) => scan.entries.push(entry),
                Ok(_) => {}
                Err(e) => scan.corrupt.push((key, e)),
            }
        }
        Ok(scan)
    }

    /// Keys under `prefix` in key order, without decoding values
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let backend = self.backend()?;
        Ok(backend
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// All entries under `prefix` carrying `tag`
    pub fn query_tag(&self, prefix: &str, tag: &str) -> Result<Vec<StoredEntry>, SyncError> {
        self.query(prefix, |entry| entry.has_tag(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::StoreCrypto;
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_store() -> LocalStore {
        let store = LocalStore::new(PlatformCapabilities::in_memory());
        store.initialize().unwrap();
        store
    }

    #[test]
    fn test_uninitialized_store_is_unavailable() {
        let store = LocalStore::new(PlatformCapabilities::in_memory());
        let err = store.get::<Value>("k").unwrap_err();
        assert!(matches!(err, SyncError::StorageUnavailable(_)));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let store = memory_store();
        store.set("k", &json!(1), &[]).unwrap();
        store.initialize().unwrap();
        assert_eq!(store.get::<i64>("k").unwrap(), Some(1));
    }

    #[test]
    fn test_shutdown_releases_and_reinitialize_recovers() {
        let store = memory_store();
        store.set("k", &json!("kept"), &[]).unwrap();

        store.shutdown();
        assert!(!store.is_initialized());
        assert!(matches!(
            store.set("k", &json!("x"), &[]),
            Err(SyncError::StorageUnavailable(_))
        ));

        store.initialize().unwrap();
        assert_eq!(store.get::<String>("k").unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn test_query_by_tag_and_predicate() {
        let store = memory_store();
        store
            .set("cache/samples/s1", &json!({"tube": "red"}), &["collection:samples".to_string()])
            .unwrap();
        store
            .set("cache/samples/s2", &json!({"tube": "lavender"}), &["collection:samples".to_string()])
            .unwrap();
        store
            .set("cache/patients/p1", &json!({"name": "Jane"}), &["collection:patients".to_string()])
            .unwrap();

        let samples = store.query_tag("cache/", "collection:samples").unwrap();
        assert_eq!(samples.len(), 2);

        let red = store
            .query("cache/", |e| e.value["tube"] == "red")
            .unwrap();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].key, "cache/samples/s1");
    }

    #[test]
    fn test_remove() {
        let store = memory_store();
        store.set("k", &json!(true), &[]).unwrap();
        store.remove("k").unwrap();
        assert!(store.get_entry("k").unwrap().is_none());
    }

    #[test]
    fn test_scan_sets_aside_undecodable_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let store = LocalStore::with_backend(backend.clone(), ValueCodec::plain());
        store.initialize().unwrap();
        store.set("queue/01", &json!(1), &["unsynced".to_string()]).unwrap();
        store.set("queue/03", &json!(3), &["unsynced".to_string()]).unwrap();
        backend.put("queue/02", b"\x01\x00garbage").unwrap();

        assert!(store.query_tag("queue/", "unsynced").is_err());

        let scan = store.scan("queue/", |e| e.has_tag("unsynced")).unwrap();
        let keys: Vec<_> = scan.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["queue/01", "queue/03"]);
        assert_eq!(scan.corrupt.len(), 1);
        assert_eq!(scan.corrupt[0].0, "queue/02");
    }

    #[test]
    fn test_embedded_store_encrypts_at_rest() {
        let temp = TempDir::new().unwrap();
        let key = StoreCrypto::generate_key();
        let caps = PlatformCapabilities::embedded(temp.path()).with_encryption_key(key);

        let store = LocalStore::new(caps);
        store.initialize().unwrap();
        store
            .set("cache/patients/p1", &json!({"name": "Jane Doe"}), &[])
            .unwrap();
        store.shutdown();

        // Raw backend bytes must not contain the plaintext
        let raw = RedbBackend::open(temp.path().join(DB_FILE_NAME)).unwrap();
        let frame = raw.get("cache/patients/p1").unwrap().unwrap();
        let needle = b"Jane Doe";
        assert!(!frame.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_wrong_key_cannot_read() {
        let temp = TempDir::new().unwrap();
        {
            let store = LocalStore::new(
                PlatformCapabilities::embedded(temp.path())
                    .with_encryption_key(StoreCrypto::generate_key()),
            );
            store.initialize().unwrap();
            store.set("k", &json!("secret"), &[]).unwrap();
        }

        let store = LocalStore::new(
            PlatformCapabilities::embedded(temp.path())
                .with_encryption_key(StoreCrypto::generate_key()),
        );
        store.initialize().unwrap();
        assert!(matches!(
            store.get::<String>("k"),
            Err(SyncError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_encrypted_file_backend_requires_key() {
        let temp = TempDir::new().unwrap();
        let mut caps = PlatformCapabilities::encrypted_file(temp.path(), StoreCrypto::generate_key());
        caps.encryption_key = None;

        let store = LocalStore::new(caps);
        assert!(matches!(store.initialize(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_encrypted_file_backend_roundtrip() {
        let temp = TempDir::new().unwrap();
        let caps = PlatformCapabilities::encrypted_file(temp.path(), StoreCrypto::generate_key())
            .with_compression_threshold(16);

        let store = LocalStore::new(caps);
        store.initialize().unwrap();
        assert_eq!(store.backend_name(), Some("file"));

        store
            .set("queue/01A", &json!({"note": "x".repeat(200)}), &["unsynced".to_string()])
            .unwrap();
        let entries = store.query_tag("queue/", "unsynced").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value["note"].as_str().unwrap().len(), 200);
    }
}
