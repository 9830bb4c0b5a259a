//! Core types for LabSync

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Unique identifier for a queued mutation
///
/// ULIDs sort lexicographically by creation time; the queue hands them out
/// from a monotonic clock so id order is enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Ulid);

impl RecordId {
    /// Create a RecordId from a ULID
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the underlying ULID
    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of mutation carried by a queued record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!(
                "Invalid operation '{}'. Must be one of: create, update, delete",
                other
            )),
        }
    }
}

/// Classification of a failed push attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient transport failure
    Network,
    /// Remote call exceeded its deadline
    Timeout,
    /// Remote store refused the write (validation, permissions, missing doc)
    Rejected,
    /// Local store failed while recording the outcome
    Storage,
}

impl FailureKind {
    /// Sticky failures are not retried automatically; an operator has to
    /// clear them first.
    pub fn is_sticky(&self) -> bool {
        matches!(self, FailureKind::Rejected)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Network => write!(f, "network"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Storage => write!(f, "storage"),
        }
    }
}

/// Last failure recorded against a queued record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SyncFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Delivery state of a queued record.
///
/// A failure can only be attached while the record is pending, and the
/// only way back from `Synced` is an explicit resync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Pending { last_error: Option<SyncFailure> },
    Synced { synced_at: DateTime<Utc> },
}

impl Default for DeliveryState {
    fn default() -> Self {
        DeliveryState::Pending { last_error: None }
    }
}

/// One queued local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub id: RecordId,
    pub collection: String,
    pub document_id: String,
    pub operation: Operation,
    /// JSON object for create/update, empty object for delete
    pub data: Value,
    /// Creation time; also the write time applied remotely
    pub timestamp: DateTime<Utc>,
    pub state: DeliveryState,
    /// Number of push attempts made so far
    #[serde(default)]
    pub attempts: u32,
}

impl OfflineRecord {
    pub fn is_synced(&self) -> bool {
        matches!(self.state, DeliveryState::Synced { .. })
    }

    pub fn sync_error(&self) -> Option<&SyncFailure> {
        match &self.state {
            DeliveryState::Pending { last_error } => last_error.as_ref(),
            DeliveryState::Synced { .. } => None,
        }
    }

    /// Pending with a failure that must not be retried automatically
    pub fn is_held(&self) -> bool {
        self.sync_error().map(|e| e.kind.is_sticky()).unwrap_or(false)
    }

    /// Ordering key used for replay
    pub fn order_key(&self) -> (DateTime<Utc>, RecordId) {
        (self.timestamp, self.id)
    }
}

/// Locally cached copy of a remote document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub collection: String,
    pub id: String,
    pub data: Value,
    /// Remote update time of `data`
    pub updated_at: DateTime<Utc>,
    /// Local time the entry was written
    pub last_synced: DateTime<Utc>,
    /// Relationship fields (e.g. parent foreign keys) lifted out of `data`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, Value>,
}

/// Document returned by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// Pull status of a collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    #[default]
    Idle,
    Syncing,
    Completed,
    Error,
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionStatus::Idle => write!(f, "idle"),
            CollectionStatus::Syncing => write!(f, "syncing"),
            CollectionStatus::Completed => write!(f, "completed"),
            CollectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Per-collection pull watermark and status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub collection: String,
    /// All remote changes at or before this time have been pulled
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub status: CollectionStatus,
    pub error: Option<String>,
}

impl SyncMetadata {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }
}

/// Outcome of the most recent sync pass, kept in the store so a later
/// process can report it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Truncate a timestamp to millisecond precision, the resolution every
/// stored and remote timestamp uses.
pub fn to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(state: DeliveryState) -> OfflineRecord {
        OfflineRecord {
            id: RecordId(Ulid::new()),
            collection: "samples".into(),
            document_id: "s1".into(),
            operation: Operation::Update,
            data: json!({"status": "collected"}),
            timestamp: Utc::now(),
            state,
            attempts: 0,
        }
    }

    #[test]
    fn test_operation_parse_and_display() {
        assert_eq!("CREATE".parse::<Operation>().unwrap(), Operation::Create);
        assert_eq!(Operation::Delete.to_string(), "delete");
        assert!("upsert".parse::<Operation>().is_err());
    }

    #[test]
    fn test_sync_error_only_while_pending() {
        let failed = record(DeliveryState::Pending {
            last_error: Some(SyncFailure::new(FailureKind::Network, "reset")),
        });
        assert!(!failed.is_synced());
        assert_eq!(failed.sync_error().unwrap().kind, FailureKind::Network);
        assert!(!failed.is_held());

        let synced = record(DeliveryState::Synced {
            synced_at: Utc::now(),
        });
        assert!(synced.is_synced());
        assert!(synced.sync_error().is_none());
    }

    #[test]
    fn test_rejected_failures_are_held() {
        let rejected = record(DeliveryState::Pending {
            last_error: Some(SyncFailure::new(FailureKind::Rejected, "permission denied")),
        });
        assert!(rejected.is_held());
    }

    #[test]
    fn test_delivery_state_serialization_is_tagged() {
        let value = serde_json::to_value(DeliveryState::default()).unwrap();
        assert_eq!(value["state"], "pending");
    }

    #[test]
    fn test_to_millis_drops_sub_millisecond_precision() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(to_millis(ts).timestamp_subsec_nanos(), 123_000_000);
    }
}
