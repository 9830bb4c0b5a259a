//! Operation queue: the append-mostly log of local mutations.
//!
//! Records live under `queue/<ulid>` in the local store and are never
//! deleted; a document with several pending edits has several records.
//! Replay order is `(timestamp, id)`, both derived from a monotonic ULID
//! clock that is re-seeded from the persisted log on first use, so order
//! survives restarts and backwards clock jumps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::SyncError;
use crate::storage::{LocalStore, StoredEntry};
use crate::types::{DeliveryState, OfflineRecord, Operation, RecordId, SyncFailure};

/// Key namespace for queued records
pub const QUEUE_PREFIX: &str = "queue/";

const TAG_UNSYNCED: &str = "unsynced";
const TAG_SYNCED: &str = "synced";

/// Counts by delivery state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Not yet delivered (includes failed and held)
    pub pending: usize,
    /// Pending with a recorded failure
    pub failed: usize,
    /// Pending with a sticky rejection awaiting an operator
    pub held: usize,
    pub synced: usize,
    /// Entries that could not be decoded
    pub corrupt: usize,
}

/// Decoded queue records plus the entries that failed to decode
#[derive(Debug, Default)]
pub struct QueueScan {
    /// Records in replay order
    pub records: Vec<OfflineRecord>,
    /// `(key, reason)` for every undecodable entry
    pub corrupt: Vec<(String, String)>,
}

#[derive(Default)]
struct IdClock {
    last: Option<Ulid>,
    seeded: bool,
}

/// Persistent FIFO of offline mutations
#[derive(Clone)]
pub struct OperationQueue {
    store: LocalStore,
    clock: Arc<Mutex<IdClock>>,
}

fn record_key(id: &RecordId) -> String {
    format!("{}{}", QUEUE_PREFIX, id)
}

fn record_tags(record: &OfflineRecord) -> Vec<String> {
    let state = if record.is_synced() {
        TAG_SYNCED
    } else {
        TAG_UNSYNCED
    };
    vec![
        state.to_string(),
        format!("collection:{}", record.collection),
        format!("doc:{}/{}", record.collection, record.document_id),
    ]
}

impl OperationQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            clock: Arc::new(Mutex::new(IdClock::default())),
        }
    }

    /// Next monotonic id and its timestamp
    fn next_id(&self) -> Result<(RecordId, DateTime<Utc>), SyncError> {
        let mut clock = self.clock.lock();
        if !clock.seeded {
            clock.last = self.latest_persisted_id()?;
            clock.seeded = true;
        }

        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let candidate = Ulid::from_parts(now_ms, rand::random::<u128>());
        let next = match clock.last {
            Some(prev) if candidate <= prev => prev.increment().ok_or_else(|| {
                SyncError::InvalidOperation("record id space exhausted".to_string())
            })?,
            _ => candidate,
        };
        clock.last = Some(next);

        let timestamp = DateTime::from_timestamp_millis(next.timestamp_ms() as i64)
            .unwrap_or_else(Utc::now);
        Ok((RecordId(next), timestamp))
    }

    fn latest_persisted_id(&self) -> Result<Option<Ulid>, SyncError> {
        let keys = self.store.keys(QUEUE_PREFIX)?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(QUEUE_PREFIX))
            .filter_map(|s| Ulid::from_string(s).ok())
            .max())
    }

    fn save(&self, record: &OfflineRecord) -> Result<(), SyncError> {
        self.store
            .set(&record_key(&record.id), record, &record_tags(record))
    }

    fn load(&self, id: &RecordId) -> Result<OfflineRecord, SyncError> {
        self.get(id)?
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))
    }

    /// Decode every record under the queue prefix accepted by `predicate`.
    /// Undecodable entries are logged and returned separately so one bad
    /// frame never hides the rest of the queue.
    fn scan<F>(&self, predicate: F) -> Result<QueueScan, SyncError>
    where
        F: Fn(&StoredEntry) -> bool,
    {
        let scan = self.store.scan(QUEUE_PREFIX, predicate)?;
        let mut corrupt: Vec<(String, String)> = scan
            .corrupt
            .into_iter()
            .map(|(key, e)| (key, e.to_string()))
            .collect();

        let mut records = Vec::with_capacity(scan.entries.len());
        for entry in &scan.entries {
            match entry.decode::<OfflineRecord>() {
                Ok(record) => records.push(record),
                Err(e) => corrupt.push((entry.key.clone(), e.to_string())),
            }
        }
        records.sort_by_key(|r| r.order_key());

        for (key, reason) in &corrupt {
            warn!(key = %key, reason = %reason, "Skipping undecodable queue entry");
        }
        Ok(QueueScan { records, corrupt })
    }

    /// Append a mutation. Never rejects because of earlier records for the
    /// same document; only malformed input is refused.
    pub fn enqueue(
        &self,
        collection: &str,
        document_id: &str,
        operation: Operation,
        data: Value,
    ) -> Result<OfflineRecord, SyncError> {
        if collection.is_empty() || collection.contains('/') {
            return Err(SyncError::InvalidOperation(format!(
                "Invalid collection name '{}'",
                collection
            )));
        }
        if document_id.is_empty() {
            return Err(SyncError::InvalidOperation(
                "Document id must not be empty".to_string(),
            ));
        }
        let data = match operation {
            Operation::Delete => Value::Object(Map::new()),
            Operation::Create | Operation::Update => {
                if !data.is_object() {
                    return Err(SyncError::InvalidOperation(format!(
                        "{} payload must be a JSON object",
                        operation
                    )));
                }
                data
            }
        };

        let (id, timestamp) = self.next_id()?;
        let record = OfflineRecord {
            id,
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            operation,
            data,
            timestamp,
            state: DeliveryState::default(),
            attempts: 0,
        };
        self.save(&record)?;

        debug!(
            record_id = %record.id,
            collection,
            document_id,
            %operation,
            "Queued offline operation"
        );
        Ok(record)
    }

    pub fn get(&self, id: &RecordId) -> Result<Option<OfflineRecord>, SyncError> {
        self.store.get(&record_key(id))
    }

    /// Every undelivered record in replay order, plus the keys of entries
    /// that could not be decoded
    pub fn scan_unsynced(&self) -> Result<QueueScan, SyncError> {
        self.scan(|e| e.has_tag(TAG_UNSYNCED))
    }

    /// Every undelivered record in replay order. Undecodable entries are
    /// skipped; see [`OperationQueue::scan_unsynced`].
    pub fn list_unsynced(&self) -> Result<Vec<OfflineRecord>, SyncError> {
        Ok(self.scan_unsynced()?.records)
    }

    /// Full queue history in replay order
    pub fn list_all(&self) -> Result<Vec<OfflineRecord>, SyncError> {
        Ok(self.scan(|_| true)?.records)
    }

    /// All records ever queued for one document, oldest first
    pub fn history(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<OfflineRecord>, SyncError> {
        let tag = format!("doc:{}/{}", collection, document_id);
        Ok(self.scan(|e| e.has_tag(&tag))?.records)
    }

    /// Undelivered records that decode
    pub fn pending_count(&self) -> Result<usize, SyncError> {
        Ok(self.scan_unsynced()?.records.len())
    }

    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        let scan = self.scan(|_| true)?;
        let mut stats = QueueStats {
            corrupt: scan.corrupt.len(),
            ..Default::default()
        };
        for record in scan.records {
            if record.is_synced() {
                stats.synced += 1;
                continue;
            }
            stats.pending += 1;
            if record.sync_error().is_some() {
                stats.failed += 1;
            }
            if record.is_held() {
                stats.held += 1;
            }
        }
        Ok(stats)
    }

    /// Record a successful push. Idempotent for already-synced records.
    pub fn mark_synced(&self, id: &RecordId) -> Result<OfflineRecord, SyncError> {
        let mut record = self.load(id)?;
        if record.is_synced() {
            return Ok(record);
        }
        record.attempts += 1;
        record.state = DeliveryState::Synced {
            synced_at: Utc::now(),
        };
        self.save(&record)?;
        Ok(record)
    }

    /// Attach a failed push attempt. Fails on synced records: delivery is
    /// never taken back by an error.
    pub fn mark_sync_error(
        &self,
        id: &RecordId,
        failure: SyncFailure,
    ) -> Result<OfflineRecord, SyncError> {
        let mut record = self.load(id)?;
        if record.is_synced() {
            return Err(SyncError::InvalidOperation(format!(
                "Record {} is already synced",
                id
            )));
        }
        record.attempts += 1;
        record.state = DeliveryState::Pending {
            last_error: Some(failure),
        };
        self.save(&record)?;
        Ok(record)
    }

    /// Explicitly send a delivered record again on the next pass
    pub fn request_resync(&self, id: &RecordId) -> Result<OfflineRecord, SyncError> {
        let mut record = self.load(id)?;
        if record.is_synced() {
            record.state = DeliveryState::default();
            self.save(&record)?;
            info!(record_id = %id, "Resync requested");
        }
        Ok(record)
    }

    /// Clear a sticky rejection so the next pass retries the record
    pub fn retry_rejected(&self, id: &RecordId) -> Result<OfflineRecord, SyncError> {
        let mut record = self.load(id)?;
        if record.is_held() {
            record.state = DeliveryState::default();
            self.save(&record)?;
            info!(record_id = %id, "Rejected record released for retry");
        }
        Ok(record)
    }
}
