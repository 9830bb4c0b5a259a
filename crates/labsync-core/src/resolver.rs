//! Conflict resolution applied when remote documents are pulled into the
//! cache.
//!
//! The only shipped policy is whole-document last-write-wins. There is no
//! field-level merge: a newer remote copy replaces every field of the
//! cached one.

use crate::types::{CacheEntry, RemoteDocument};

/// Outcome of comparing a cached copy with an incoming remote document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the cached copy with the remote document
    ApplyRemote,
    /// Leave the cached copy untouched
    KeepLocal,
}

/// Merge policy for pulled documents
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, cached: Option<&CacheEntry>, incoming: &RemoteDocument) -> Resolution;
}

/// Later `updated_at` wins; ties keep the cached copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, cached: Option<&CacheEntry>, incoming: &RemoteDocument) -> Resolution {
        match cached {
            None => Resolution::ApplyRemote,
            Some(entry) if incoming.updated_at > entry.updated_at => Resolution::ApplyRemote,
            Some(_) => Resolution::KeepLocal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn cached_at(offset_secs: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            collection: "samples".to_string(),
            id: "s1".to_string(),
            data: json!({"status": "collected", "tube": "red"}),
            updated_at: now + Duration::seconds(offset_secs),
            last_synced: now,
            relations: BTreeMap::new(),
        }
    }

    fn incoming(entry: &CacheEntry, offset_secs: i64) -> RemoteDocument {
        RemoteDocument {
            id: entry.id.clone(),
            data: json!({"status": "received"}),
            updated_at: entry.updated_at + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_missing_cache_entry_takes_remote() {
        let doc = RemoteDocument {
            id: "s1".to_string(),
            data: json!({}),
            updated_at: Utc::now(),
        };
        assert_eq!(LastWriteWins.resolve(None, &doc), Resolution::ApplyRemote);
    }

    #[test]
    fn test_newer_remote_wins() {
        let cached = cached_at(0);
        assert_eq!(
            LastWriteWins.resolve(Some(&cached), &incoming(&cached, 5)),
            Resolution::ApplyRemote
        );
    }

    #[test]
    fn test_older_or_equal_remote_keeps_cache() {
        let cached = cached_at(0);
        assert_eq!(
            LastWriteWins.resolve(Some(&cached), &incoming(&cached, -5)),
            Resolution::KeepLocal
        );
        assert_eq!(
            LastWriteWins.resolve(Some(&cached), &incoming(&cached, 0)),
            Resolution::KeepLocal
        );
    }
}
