//! In-process remote store with failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::{RemoteError, RemoteStore};
use crate::types::{to_millis, Operation, RemoteDocument};

/// A write accepted by [`MemoryRemote`], in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    pub operation: Operation,
    pub collection: String,
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Value,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    writes: Vec<RemoteWrite>,
    /// Documents whose writes fail with the given error
    document_failures: HashMap<(String, String), RemoteError>,
    /// Collections whose queries fail with the given error
    query_failures: HashMap<String, RemoteError>,
    unreachable: bool,
    latency: Option<Duration>,
    calls: usize,
}

/// Remote store held in process memory.
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a document as if another client wrote it
    pub fn insert(&self, collection: &str, id: &str, data: Value, updated_at: DateTime<Utc>) {
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(
                id.to_string(),
                StoredDocument {
                    data,
                    updated_at: to_millis(updated_at),
                },
            );
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<RemoteDocument> {
        let state = self.state.lock();
        state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| RemoteDocument {
                id: id.to_string(),
                data: doc.data.clone(),
                updated_at: doc.updated_at,
            })
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Every accepted write in arrival order
    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.state.lock().writes.clone()
    }

    /// Total calls received, including failed ones
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Fail every write to one document until cleared
    pub fn fail_document(&self, collection: &str, id: &str, error: RemoteError) {
        self.state
            .lock()
            .document_failures
            .insert((collection.to_string(), id.to_string()), error);
    }

    pub fn clear_document_failure(&self, collection: &str, id: &str) {
        self.state
            .lock()
            .document_failures
            .remove(&(collection.to_string(), id.to_string()));
    }

    /// Fail every query of one collection until cleared
    pub fn fail_queries(&self, collection: &str, error: RemoteError) {
        self.state
            .lock()
            .query_failures
            .insert(collection.to_string(), error);
    }

    pub fn clear_query_failure(&self, collection: &str) {
        self.state.lock().query_failures.remove(collection);
    }

    /// Make every call fail with a network error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Delay every call by `latency` before answering
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Common call prologue: count, delay, reachability
    async fn enter(&self) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.state.lock();
            state.calls += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.state.lock().unreachable {
            return Err(RemoteError::Network("remote unreachable".to_string()));
        }
        Ok(())
    }

    fn write(
        &self,
        operation: Operation,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: Option<DateTime<Utc>>,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some(err) = state
            .document_failures
            .get(&(collection.to_string(), id.to_string()))
        {
            return Err(err.clone());
        }

        let docs = state.collections.entry(collection.to_string()).or_default();
        match operation {
            Operation::Create | Operation::Update => {
                if operation == Operation::Update && !docs.contains_key(id) {
                    return Err(RemoteError::Rejected(format!(
                        "document {}/{} does not exist",
                        collection, id
                    )));
                }
                docs.insert(
                    id.to_string(),
                    StoredDocument {
                        data: data.clone(),
                        updated_at: to_millis(written_at.unwrap_or_else(Utc::now)),
                    },
                );
            }
            Operation::Delete => {
                docs.remove(id);
            }
        }

        state.writes.push(RemoteWrite {
            operation,
            collection: collection.to_string(),
            id: id.to_string(),
            data: data.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        self.enter().await?;
        self.write(Operation::Create, collection, id, data, Some(written_at))
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
        written_at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        self.enter().await?;
        self.write(Operation::Update, collection, id, data, Some(written_at))
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.enter().await?;
        self.write(Operation::Delete, collection, id, &Value::Null, None)
    }

    async fn query_updated_since(
        &self,
        collection: &str,
        since: Option<DateTime<Utc>>,
        page_size: usize,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        self.enter().await?;
        let state = self.state.lock();
        if let Some(err) = state.query_failures.get(collection) {
            return Err(err.clone());
        }

        let mut docs: Vec<RemoteDocument> = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| since.map_or(true, |s| doc.updated_at > s))
                    .map(|(id, doc)| RemoteDocument {
                        id: id.clone(),
                        data: doc.data.clone(),
                        updated_at: doc.updated_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)));
        docs.truncate(page_size);
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_update_delete() {
        let remote = MemoryRemote::new();
        let t0 = Utc::now();

        remote
            .create_document("patients", "p1", &json!({"name": "Jane"}), t0)
            .await
            .unwrap();
        remote
            .update_document("patients", "p1", &json!({"name": "Jane D."}), t0)
            .await
            .unwrap();
        assert_eq!(remote.get("patients", "p1").unwrap().data["name"], "Jane D.");
        assert_eq!(remote.get("patients", "p1").unwrap().updated_at, to_millis(t0));

        remote.delete_document("patients", "p1").await.unwrap();
        remote.delete_document("patients", "p1").await.unwrap();
        assert!(remote.get("patients", "p1").is_none());
        assert_eq!(remote.writes().len(), 4);
    }

    #[tokio::test]
    async fn test_update_of_missing_document_is_rejected() {
        let remote = MemoryRemote::new();
        let err = remote
            .update_document("patients", "ghost", &json!({}), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_query_is_strictly_after_and_paged() {
        let remote = MemoryRemote::new();
        let t0 = Utc::now();
        for i in 0..5 {
            remote.insert(
                "samples",
                &format!("s{}", i),
                json!({"n": i}),
                t0 + ChronoDuration::seconds(i),
            );
        }

        let page = remote.query_updated_since("samples", None, 2).await.unwrap();
        assert_eq!(page.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["s0", "s1"]);

        let rest = remote
            .query_updated_since("samples", Some(page[1].updated_at), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].id, "s2");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let remote = MemoryRemote::new();
        remote.fail_document("orders", "o1", RemoteError::Rejected("invalid".into()));
        assert!(remote
            .create_document("orders", "o1", &json!({}), Utc::now())
            .await
            .is_err());
        assert!(remote
            .create_document("orders", "o2", &json!({}), Utc::now())
            .await
            .is_ok());

        remote.set_unreachable(true);
        assert!(matches!(
            remote.query_updated_since("orders", None, 10).await,
            Err(RemoteError::Network(_))
        ));
        assert_eq!(remote.call_count(), 3);
    }
}
