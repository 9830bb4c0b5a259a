//! File-per-key backend for platforms without an embedded database.
//!
//! Each key lives in its own `.val` file. The file carries the key itself
//! so prefix scans can recover it:
//!
//! ```text
//! +-----------------+------------+-------------+
//! | key_len (u32le) | key header | value bytes |
//! +-----------------+------------+-------------+
//! ```
//!
//! Opened with [`FileBackend::open_sealed`], the key header is encrypted
//! with the store key and file names are a keyed hash of the key, so
//! nothing on disk names a collection or document. A backend opened with
//! [`FileBackend::open`] stores keys in plaintext and names files by an
//! unkeyed hash; use it only where the directory itself is protected.
//!
//! Writes go to a uniquely named temporary file that is persisted over
//! the target, so a value is never observed half-written and concurrent
//! writers never share a temporary file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::backend::StorageBackend;
use crate::crypto::StoreCrypto;
use crate::error::SyncError;

const VALUE_EXT: &str = "val";
const TMP_PREFIX: &str = ".tmp-";

/// Context string for deriving the file-name key from the store key
const NAME_KEY_CONTEXT: &str = "labsync 2024 file backend key names";

struct Sealing {
    crypto: StoreCrypto,
    name_key: [u8; 32],
}

pub struct FileBackend {
    dir: PathBuf,
    sealing: Option<Sealing>,
}

impl FileBackend {
    /// Open with plaintext key headers
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SyncError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, sealing: None })
    }

    /// Open with key headers encrypted under `key`
    pub fn open_sealed(dir: impl AsRef<Path>, key: &[u8; 32]) -> Result<Self, SyncError> {
        let mut backend = Self::open(dir)?;
        backend.sealing = Some(Sealing {
            crypto: StoreCrypto::new(key),
            name_key: blake3::derive_key(NAME_KEY_CONTEXT, key),
        });
        Ok(backend)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = match &self.sealing {
            Some(sealing) => blake3::keyed_hash(&sealing.name_key, key.as_bytes()),
            None => blake3::hash(key.as_bytes()),
        };
        self.dir.join(format!("{}.{}", hash.to_hex(), VALUE_EXT))
    }

    fn seal_key(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        match &self.sealing {
            Some(sealing) => sealing.crypto.encrypt(key.as_bytes()),
            None => Ok(key.as_bytes().to_vec()),
        }
    }

    fn open_key(&self, header: &[u8], path: &Path) -> Result<String, SyncError> {
        let plain = match &self.sealing {
            Some(sealing) => sealing.crypto.decrypt(header)?,
            None => header.to_vec(),
        };
        String::from_utf8(plain)
            .map_err(|e| SyncError::Storage(format!("Corrupt key in {}: {}", path.display(), e)))
    }

    fn read_file(&self, path: &Path) -> Result<Option<(String, Vec<u8>)>, SyncError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = || SyncError::Storage(format!("Corrupt value file {}", path.display()));
        if bytes.len() < 4 {
            return Err(corrupt());
        }
        let key_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + key_len {
            return Err(corrupt());
        }
        let key = self.open_key(&bytes[4..4 + key_len], path)?;
        Ok(Some((key, bytes[4 + key_len..].to_vec())))
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.read_file(&self.path_for(key))?.map(|(_, value)| value))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        let header = self.seal_key(key)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(&self.dir)?;
        tmp.write_all(&(header.len() as u32).to_le_bytes())?;
        tmp.write_all(&header)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        persist(tmp, &self.path_for(key))
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, SyncError> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXT) {
                continue;
            }
            if let Some((key, value)) = self.read_file(&path)? {
                if key.starts_with(prefix) {
                    entries.push((key, value));
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

fn persist(tmp: NamedTempFile, target: &Path) -> Result<(), SyncError> {
    tmp.persist(target).map_err(|e| SyncError::from(e.error))?;
    Ok(())
}
