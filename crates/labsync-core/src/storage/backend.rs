//! Raw key/value backends behind the local store.
//!
//! Backends only move opaque bytes; framing, encryption and compression
//! happen one layer up in [`super::LocalStore`].

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::SyncError;

/// A byte-oriented key/value backend.
///
/// `put` must replace a value atomically: a concurrent or subsequent
/// reader sees either the old or the new bytes, never a mix.
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), SyncError>;

    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), SyncError>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, SyncError>;
}

/// Ephemeral in-process backend.
///
/// Stands in for browser storage and is the default for tests.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, SyncError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_scan_prefix_is_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        backend.put("queue/02", b"b").unwrap();
        backend.put("queue/01", b"a").unwrap();
        backend.put("queuf/00", b"x").unwrap();
        backend.put("cache/p/1", b"c").unwrap();

        let keys: Vec<_> = backend
            .scan_prefix("queue/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["queue/01", "queue/02"]);
    }

    #[test]
    fn test_memory_backend_remove_missing_is_ok() {
        let backend = MemoryBackend::new();
        backend.remove("nothing").unwrap();
        assert!(backend.get("nothing").unwrap().is_none());
    }
}
