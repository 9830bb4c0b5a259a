//! Cache manager: the local read replica of remote collections.
//!
//! Entries live under `cache/<collection>/<id>` and are replaced whole on
//! every accepted pull. Per-collection pull watermarks live under
//! `meta/<collection>`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;
use crate::resolver::{ConflictResolver, Resolution};
use crate::storage::{LocalStore, StoredEntry};
use crate::types::{to_millis, CacheEntry, PassSummary, RemoteDocument, SyncMetadata};

/// Key namespace for cached documents
pub const CACHE_PREFIX: &str = "cache/";

/// Key namespace for sync metadata
pub const META_PREFIX: &str = "meta/";

/// Summary of the most recent sync pass
const LAST_PASS_KEY: &str = "state/last_pass";

fn entry_key(collection: &str, id: &str) -> String {
    format!("{}{}/{}", CACHE_PREFIX, collection, id)
}

fn collection_prefix(collection: &str) -> String {
    format!("{}{}/", CACHE_PREFIX, collection)
}

fn meta_key(collection: &str) -> String {
    format!("{}{}", META_PREFIX, collection)
}

/// Tag value for a relationship field. Strings are used verbatim, other
/// JSON values by their compact encoding.
pub fn relation_tag(field: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!("rel:{}={}", field, s),
        other => format!("rel:{}={}", field, other),
    }
}

/// Local replica of remote collections plus their pull metadata
#[derive(Clone)]
pub struct CacheManager {
    store: LocalStore,
    /// Relationship fields lifted out of documents, per collection
    relation_fields: Arc<HashMap<String, Vec<String>>>,
}

impl CacheManager {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            relation_fields: Arc::new(HashMap::new()),
        }
    }

    pub fn with_relation_fields(mut self, fields: HashMap<String, Vec<String>>) -> Self {
        self.relation_fields = Arc::new(fields);
        self
    }

    fn extract_relations(&self, collection: &str, data: &Value) -> BTreeMap<String, Value> {
        let mut relations = BTreeMap::new();
        if let Some(fields) = self.relation_fields.get(collection) {
            for field in fields {
                if let Some(value) = data.get(field).filter(|v| !v.is_null()) {
                    relations.insert(field.clone(), value.clone());
                }
            }
        }
        relations
    }

    fn decode_all(entries: Vec<StoredEntry>) -> Result<Vec<CacheEntry>, SyncError> {
        entries.iter().map(|e| e.decode::<CacheEntry>()).collect()
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<CacheEntry>, SyncError> {
        self.store.get(&entry_key(collection, id))
    }

    /// Every cached document of `collection`, ordered by id
    pub fn list(&self, collection: &str) -> Result<Vec<CacheEntry>, SyncError> {
        Self::decode_all(self.store.query(&collection_prefix(collection), |_| true)?)
    }

    /// One document when `id` is given, the whole collection otherwise
    pub fn get_cached(
        &self,
        collection: &str,
        id: Option<&str>,
    ) -> Result<Vec<CacheEntry>, SyncError> {
        match id {
            Some(id) => Ok(self.get(collection, id)?.into_iter().collect()),
            None => self.list(collection),
        }
    }

    /// Cached documents of `collection` whose relationship `field` equals
    /// `value`
    pub fn find_related(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<CacheEntry>, SyncError> {
        let tag = relation_tag(field, value);
        Self::decode_all(self.store.query_tag(&collection_prefix(collection), &tag)?)
    }

    /// Write a remote document into the cache, replacing any existing copy
    pub fn put(&self, collection: &str, doc: &RemoteDocument) -> Result<CacheEntry, SyncError> {
        let relations = self.extract_relations(collection, &doc.data);
        let mut tags = vec![format!("collection:{}", collection)];
        tags.extend(relations.iter().map(|(f, v)| relation_tag(f, v)));

        let entry = CacheEntry {
            collection: collection.to_string(),
            id: doc.id.clone(),
            data: doc.data.clone(),
            updated_at: to_millis(doc.updated_at),
            last_synced: to_millis(Utc::now()),
            relations,
        };
        self.store.set(&entry_key(collection, &doc.id), &entry, &tags)?;
        Ok(entry)
    }

    /// Run `resolver` against the cached copy and write the remote document
    /// if it wins. Returns whether the cache changed.
    pub fn apply_remote(
        &self,
        collection: &str,
        doc: &RemoteDocument,
        resolver: &dyn ConflictResolver,
    ) -> Result<bool, SyncError> {
        // Compare at the precision the cache stores
        let doc = RemoteDocument {
            updated_at: to_millis(doc.updated_at),
            ..doc.clone()
        };
        let cached = self.get(collection, &doc.id)?;
        match resolver.resolve(cached.as_ref(), &doc) {
            Resolution::ApplyRemote => {
                self.put(collection, &doc)?;
                Ok(true)
            }
            Resolution::KeepLocal => {
                debug!(collection, document_id = %doc.id, "Kept cached copy over remote");
                Ok(false)
            }
        }
    }

    pub fn evict(&self, collection: &str, id: &str) -> Result<(), SyncError> {
        self.store.remove(&entry_key(collection, id))
    }

    /// Drop cached documents of one collection, or of every collection.
    /// Watermarks are reset along with them so the next pull refills the
    /// cache. Returns the number of documents removed.
    pub fn clear(&self, collection: Option<&str>) -> Result<usize, SyncError> {
        let (cache_prefix, meta_prefix) = match collection {
            Some(c) => (collection_prefix(c), meta_key(c)),
            None => (CACHE_PREFIX.to_string(), META_PREFIX.to_string()),
        };

        let keys = self.store.keys(&cache_prefix)?;
        for key in &keys {
            self.store.remove(key)?;
        }
        for key in self.store.keys(&meta_prefix)? {
            if collection.is_none() || key == meta_prefix {
                self.store.remove(&key)?;
            }
        }
        Ok(keys.len())
    }

    /// Stored metadata, or a fresh idle record if the collection was never
    /// pulled
    pub fn metadata(&self, collection: &str) -> Result<SyncMetadata, SyncError> {
        Ok(self
            .store
            .get(&meta_key(collection))?
            .unwrap_or_else(|| SyncMetadata::new(collection)))
    }

    pub fn save_metadata(&self, metadata: &SyncMetadata) -> Result<(), SyncError> {
        self.store
            .set(&meta_key(&metadata.collection), metadata, &[])
    }

    /// Metadata of every collection pulled so far
    pub fn all_metadata(&self) -> Result<Vec<SyncMetadata>, SyncError> {
        self.store
            .query(META_PREFIX, |_| true)?
            .iter()
            .map(|e| e.decode::<SyncMetadata>())
            .collect()
    }

    /// Summary of the last finished pass, from this or an earlier process
    pub fn last_pass(&self) -> Result<Option<PassSummary>, SyncError> {
        self.store.get(LAST_PASS_KEY)
    }

    pub fn save_last_pass(&self, summary: &PassSummary) -> Result<(), SyncError> {
        self.store.set(LAST_PASS_KEY, summary, &[])
    }
}
