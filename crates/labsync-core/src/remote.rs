//! Remote document store interface.
//!
//! The hosted backend is an opaque collaborator: four calls, three error
//! classes. [`MemoryRemote`] is an in-process implementation with failure
//! injection; [`HttpRemote`] (feature `http`) speaks REST/JSON.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::error::SyncError;
use crate::types::{FailureKind, RemoteDocument, SyncFailure};

mod memory;
pub use memory::{MemoryRemote, RemoteWrite};

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpRemote;

/// Failure reported by a remote store call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure; the same call may succeed later
    #[error("network error: {0}")]
    Network(String),

    /// The remote refused the call (validation, permissions, missing
    /// document). Retrying the same input will fail again.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Network(_) => FailureKind::Network,
            RemoteError::Rejected(_) => FailureKind::Rejected,
            RemoteError::Timeout(_) => FailureKind::Timeout,
        }
    }

    /// Record-level failure for the queue
    pub fn to_failure(&self) -> SyncFailure {
        let message = match self {
            RemoteError::Network(m) | RemoteError::Rejected(m) => m.clone(),
            RemoteError::Timeout(d) => format!("no response within {:?}", d),
        };
        SyncFailure::new(self.kind(), message)
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(m) => SyncError::Network(m),
            RemoteError::Rejected(m) => SyncError::RemoteRejected(m),
            RemoteError::Timeout(d) => SyncError::Timeout(d),
        }
    }
}

/// The authoritative hosted document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create (or overwrite) a document stamped with `written_at`
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError>;

    /// Replace an existing document. A missing document is a rejection.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError>;

    /// Delete a document; deleting a missing document succeeds.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Documents with `updated_at` strictly greater than `since`, ascending
    /// by `(updated_at, id)`, at most `page_size` of them.
    async fn query_updated_since(
        &self,
        collection: &str,
        since: Option<DateTime<Utc>>,
        page_size: usize,
    ) -> Result<Vec<RemoteDocument>, RemoteError>;
}
