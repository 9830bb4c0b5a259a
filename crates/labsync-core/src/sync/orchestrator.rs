//! The sync pass: push the queue, then pull remote deltas into the cache.
//!
//! ```text
//! run_pass(trigger)
//!   ├── offline?            -> Offline
//!   ├── pass in flight?     -> AlreadyRunning
//!   ├── push: scan_unsynced() in (timestamp, id) order, report corrupt entries
//!   │     ├── held / blocked document -> skip
//!   │     ├── remote ok   -> mark_synced, mirror into cache (evict on delete)
//!   │     └── remote err  -> mark_sync_error, block document for this pass
//!   ├── pull: tracked collections, bounded concurrency
//!   │     └── pages of query_updated_since(watermark) -> resolver -> cache
//!   └── publish PassCompleted + StatusChanged
//! ```
//!
//! Nothing inside a pass propagates to the caller. Push failures are
//! attached to records, pull failures to collection metadata, and both are
//! summarized in the [`SyncReport`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{StatusSnapshot, SyncEvent, SyncOutcome, SyncReport, SyncTrigger};
use crate::cache::CacheManager;
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::network::NetworkMonitor;
use crate::queue::OperationQueue;
use crate::remote::{RemoteError, RemoteStore};
use crate::resolver::ConflictResolver;
use crate::types::{
    CollectionStatus, OfflineRecord, Operation, PassSummary, RemoteDocument, SyncMetadata,
};

/// Default capacity for the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Clears the in-flight flag when the pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives push and pull against one remote store
pub struct SyncOrchestrator {
    queue: OperationQueue,
    cache: CacheManager,
    remote: Arc<dyn RemoteStore>,
    resolver: Arc<dyn ConflictResolver>,
    network: NetworkMonitor,
    settings: SyncSettings,
    running: AtomicBool,
    last_sync: RwLock<Option<DateTime<Utc>>>,
    last_errors: RwLock<Vec<String>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: OperationQueue,
        cache: CacheManager,
        remote: Arc<dyn RemoteStore>,
        resolver: Arc<dyn ConflictResolver>,
        network: NetworkMonitor,
        settings: SyncSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let last_pass = cache.last_pass().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load last sync pass summary");
            None
        });
        let (last_sync, last_errors) = match last_pass {
            Some(summary) => (Some(summary.finished_at), summary.errors),
            None => (None, Vec::new()),
        };
        Self {
            queue,
            cache,
            remote,
            resolver,
            network,
            settings,
            running: AtomicBool::new(false),
            last_sync: RwLock::new(last_sync),
            last_errors: RwLock::new(last_errors),
            event_tx,
        }
    }

    /// Subscribe to sync events
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn status(&self) -> StatusSnapshot {
        let pending_changes = self.queue.pending_count().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count pending changes");
            0
        });
        StatusSnapshot {
            is_syncing: self.is_syncing(),
            last_sync: *self.last_sync.read(),
            pending_changes,
            errors: self.last_errors.read().clone(),
        }
    }

    fn publish_status(&self) {
        self.emit(SyncEvent::StatusChanged(self.status()));
    }

    /// Run one pass unless offline or another pass is in flight.
    pub async fn run_pass(&self, trigger: SyncTrigger) -> SyncOutcome {
        if !self.network.is_online() {
            debug!(%trigger, "Skipping sync pass while offline");
            return SyncOutcome::Offline;
        }
        let Some(guard) = PassGuard::acquire(&self.running) else {
            debug!(%trigger, "Sync pass already running");
            return SyncOutcome::AlreadyRunning;
        };

        info!(%trigger, "Sync pass started");
        self.publish_status();

        let mut report = SyncReport::new(trigger);
        self.push_phase(&mut report).await;
        self.pull_phase(&mut report).await;
        report.finished_at = Utc::now();

        *self.last_sync.write() = Some(report.finished_at);
        *self.last_errors.write() = report.errors.clone();
        let summary = PassSummary {
            finished_at: report.finished_at,
            errors: report.errors.clone(),
        };
        if let Err(e) = self.cache.save_last_pass(&summary) {
            warn!(error = %e, "Failed to persist sync pass summary");
        }
        drop(guard);

        if report.succeeded() {
            info!(
                %trigger,
                pushed = report.pushed,
                held = report.held,
                pulled = report.pulled,
                "Sync pass succeeded"
            );
        } else {
            warn!(
                %trigger,
                pushed = report.pushed,
                failed = report.push_failed,
                held = report.held,
                pulled = report.pulled,
                collections_failed = report.collections_failed,
                "Sync pass finished with failures"
            );
        }

        self.emit(SyncEvent::PassCompleted(report.clone()));
        self.publish_status();
        SyncOutcome::Completed(report)
    }

    /// Bound a remote call by the configured timeout
    async fn with_timeout<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let limit = self.settings.remote_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(limit)),
        }
    }

    async fn push_record(&self, record: &OfflineRecord) -> Result<(), RemoteError> {
        let remote = self.remote.as_ref();
        let (collection, id) = (record.collection.as_str(), record.document_id.as_str());
        match record.operation {
            Operation::Create => {
                self.with_timeout(remote.create_document(collection, id, &record.data, record.timestamp))
                    .await
            }
            Operation::Update => {
                self.with_timeout(remote.update_document(collection, id, &record.data, record.timestamp))
                    .await
            }
            Operation::Delete => {
                self.with_timeout(remote.delete_document(collection, id))
                    .await
            }
        }
    }

    async fn push_phase(&self, report: &mut SyncReport) {
        let scan = match self.queue.scan_unsynced() {
            Ok(scan) => scan,
            Err(e) => {
                warn!(error = %e, "Failed to read operation queue");
                report.errors.push(format!("queue: {}", e));
                return;
            }
        };
        for (key, reason) in &scan.corrupt {
            report.errors.push(format!("queue entry {}: {}", key, reason));
        }
        let records = scan.records;

        // Documents with an earlier record that did not go through
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for record in records {
            let document = (record.collection.clone(), record.document_id.clone());
            if blocked.contains(&document) {
                debug!(
                    record_id = %record.id,
                    collection = %record.collection,
                    document_id = %record.document_id,
                    "Holding record behind an earlier failure"
                );
                report.held += 1;
                continue;
            }
            if record.is_held() {
                debug!(record_id = %record.id, "Skipping rejected record");
                report.held += 1;
                blocked.insert(document);
                continue;
            }

            match self.push_record(&record).await {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_synced(&record.id) {
                        // Delivered but not recorded: redelivered next pass
                        warn!(record_id = %record.id, error = %e, "Failed to mark record synced");
                        report.push_failed += 1;
                        report.errors.push(format!("{}: {}", record.id, e));
                        blocked.insert(document);
                        continue;
                    }
                    report.pushed += 1;
                    debug!(
                        record_id = %record.id,
                        collection = %record.collection,
                        document_id = %record.document_id,
                        operation = %record.operation,
                        "Pushed record"
                    );

                    self.reflect_in_cache(&record);
                }
                Err(err) => {
                    warn!(
                        record_id = %record.id,
                        collection = %record.collection,
                        document_id = %record.document_id,
                        error = %err,
                        "Push failed"
                    );
                    report.push_failed += 1;
                    report.errors.push(format!(
                        "{}/{}: {}",
                        record.collection, record.document_id, err
                    ));
                    if let Err(e) = self.queue.mark_sync_error(&record.id, err.to_failure()) {
                        warn!(record_id = %record.id, error = %e, "Failed to record push failure");
                    }
                    blocked.insert(document);
                }
            }
        }
    }

    /// Mirror a delivered record into the cache so the local write shows
    /// up even when the pull watermark has already moved past it
    fn reflect_in_cache(&self, record: &OfflineRecord) {
        let (collection, id) = (record.collection.as_str(), record.document_id.as_str());
        let result = match record.operation {
            Operation::Delete => self.cache.evict(collection, id),
            Operation::Create | Operation::Update => {
                if !self.settings.collections.iter().any(|c| c == collection) {
                    return;
                }
                let doc = RemoteDocument {
                    id: id.to_string(),
                    data: record.data.clone(),
                    updated_at: record.timestamp,
                };
                self.cache
                    .apply_remote(collection, &doc, self.resolver.as_ref())
                    .map(|_| ())
            }
        };
        if let Err(e) = result {
            warn!(
                record_id = %record.id,
                collection,
                document_id = id,
                error = %e,
                "Failed to reflect pushed record in cache"
            );
        }
    }

    async fn pull_phase(&self, report: &mut SyncReport) {
        let concurrency = self.settings.pull_concurrency.max(1);
        let results: Vec<(String, Result<usize, SyncError>)> =
            stream::iter(self.settings.collections.iter().cloned())
                .map(|collection| async move {
                    let result = self.pull_collection(&collection).await;
                    (collection, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        for (collection, result) in results {
            match result {
                Ok(pulled) => report.pulled += pulled,
                Err(e) => {
                    report.collections_failed += 1;
                    report.errors.push(format!("{}: {}", collection, e));
                }
            }
        }
    }

    /// Pull one collection and record the outcome in its metadata
    async fn pull_collection(&self, collection: &str) -> Result<usize, SyncError> {
        let mut meta = self.cache.metadata(collection)?;
        meta.status = CollectionStatus::Syncing;
        self.cache.save_metadata(&meta)?;

        let result = self.pull_pages(collection, &mut meta).await;
        match &result {
            Ok(pulled) => {
                meta.status = CollectionStatus::Completed;
                meta.error = None;
                debug!(collection, pulled, "Pulled collection");
            }
            Err(e) => {
                meta.status = CollectionStatus::Error;
                meta.error = Some(e.to_string());
                warn!(collection, error = %e, "Pull failed");
            }
        }
        self.cache.save_metadata(&meta)?;
        result
    }

    /// Fetch pages past the watermark until a short page or the page cap.
    /// The watermark in `meta` advances only after a page is fully cached.
    async fn pull_pages(
        &self,
        collection: &str,
        meta: &mut SyncMetadata,
    ) -> Result<usize, SyncError> {
        let page_size = self.settings.page_size;
        let mut pulled = 0;

        for _ in 0..self.settings.max_pages_per_pass {
            let page = self
                .with_timeout(self.remote.query_updated_since(
                    collection,
                    meta.last_sync_timestamp,
                    page_size,
                ))
                .await?;

            for doc in &page {
                if self.cache.apply_remote(collection, doc, self.resolver.as_ref())? {
                    pulled += 1;
                }
            }

            if let Some(page_max) = page.iter().map(|d| d.updated_at).max() {
                meta.last_sync_timestamp = Some(match meta.last_sync_timestamp {
                    Some(current) => current.max(page_max),
                    None => page_max,
                });
            }

            if page.len() < page_size {
                break;
            }
        }
        Ok(pulled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::storage::{MemoryBackend, StorageBackend, ValueCodec};
    use async_trait::async_trait;
    use crate::resolver::LastWriteWins;
    use crate::storage::{LocalStore, PlatformCapabilities};
    use serde_json::json;

    fn create_test_orchestrator(remote: MemoryRemote, collections: &[&str]) -> SyncOrchestrator {
        let store = LocalStore::new(PlatformCapabilities::in_memory());
        store.initialize().unwrap();
        orchestrator_on(store, Arc::new(remote), collections)
    }

    fn orchestrator_on(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        collections: &[&str],
    ) -> SyncOrchestrator {
        let settings = SyncSettings {
            collections: collections.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        };
        SyncOrchestrator::new(
            OperationQueue::new(store.clone()),
            CacheManager::new(store),
            remote,
            Arc::new(LastWriteWins),
            NetworkMonitor::new(true),
            settings,
        )
    }

    /// Read-only remote keeping microsecond timestamps but filtering on
    /// millisecond `since` values, like a server behind a coarse query API
    struct MicrosecondRemote {
        docs: Vec<RemoteDocument>,
    }

    #[async_trait]
    impl RemoteStore for MicrosecondRemote {
        async fn create_document(
            &self,
            _: &str,
            _: &str,
            _: &serde_json::Value,
            _: DateTime<Utc>,
        ) -> Result<(), RemoteError> {
            Err(RemoteError::Rejected("read only".into()))
        }

        async fn update_document(
            &self,
            _: &str,
            _: &str,
            _: &serde_json::Value,
            _: DateTime<Utc>,
        ) -> Result<(), RemoteError> {
            Err(RemoteError::Rejected("read only".into()))
        }

        async fn delete_document(&self, _: &str, _: &str) -> Result<(), RemoteError> {
            Err(RemoteError::Rejected("read only".into()))
        }

        async fn query_updated_since(
            &self,
            _: &str,
            since: Option<DateTime<Utc>>,
            page_size: usize,
        ) -> Result<Vec<RemoteDocument>, RemoteError> {
            let since = since.map(crate::types::to_millis);
            Ok(self
                .docs
                .iter()
                .filter(|d| since.map_or(true, |s| d.updated_at > s))
                .take(page_size)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_pass_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = PassGuard::acquire(&flag).unwrap();
        assert!(PassGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(PassGuard::acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_offline_pass_is_skipped() {
        let remote = MemoryRemote::new();
        let orchestrator = create_test_orchestrator(remote.clone(), &["patients"]);
        orchestrator.network.set_online(false);

        assert_eq!(
            orchestrator.run_pass(SyncTrigger::Manual).await,
            SyncOutcome::Offline
        );
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_push_then_pull_round() {
        let remote = MemoryRemote::new();
        remote.insert("patients", "p9", json!({"name": "Remote"}), Utc::now());
        let orchestrator = create_test_orchestrator(remote.clone(), &["patients"]);

        orchestrator
            .queue
            .enqueue("patients", "p1", Operation::Create, json!({"name": "Local"}))
            .unwrap();

        let outcome = orchestrator.run_pass(SyncTrigger::Manual).await;
        let report = outcome.report().unwrap();
        assert!(report.succeeded());
        assert_eq!(report.pushed, 1);
        // p1 is already cached from the push; only p9 is new
        assert_eq!(report.pulled, 1);

        assert_eq!(orchestrator.queue.pending_count().unwrap(), 0);
        assert_eq!(orchestrator.cache.list("patients").unwrap().len(), 2);

        let meta = orchestrator.cache.metadata("patients").unwrap();
        assert_eq!(meta.status, CollectionStatus::Completed);
        assert!(meta.last_sync_timestamp.is_some());

        let status = orchestrator.status();
        assert!(!status.is_syncing);
        assert!(status.last_sync.is_some());
        assert!(status.errors.is_empty());
    }

    #[tokio::test]
    async fn test_successful_delete_evicts_cache() {
        let remote = MemoryRemote::new();
        remote.insert("samples", "s1", json!({"tube": "red"}), Utc::now());
        let orchestrator = create_test_orchestrator(remote.clone(), &["samples"]);

        orchestrator.run_pass(SyncTrigger::Manual).await;
        assert!(orchestrator.cache.get("samples", "s1").unwrap().is_some());

        orchestrator
            .queue
            .enqueue("samples", "s1", Operation::Delete, json!({}))
            .unwrap();
        orchestrator.run_pass(SyncTrigger::Manual).await;

        assert!(remote.get("samples", "s1").is_none());
        assert!(orchestrator.cache.get("samples", "s1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pull_failure_is_isolated_per_collection() {
        let remote = MemoryRemote::new();
        remote.insert("patients", "p1", json!({}), Utc::now());
        remote.insert("samples", "s1", json!({}), Utc::now());
        remote.fail_queries("samples", RemoteError::Network("502".into()));
        let orchestrator = create_test_orchestrator(remote.clone(), &["patients", "samples"]);

        let report = orchestrator.run_pass(SyncTrigger::Timer).await.report().cloned().unwrap();
        assert_eq!(report.collections_failed, 1);
        assert_eq!(report.notification(), "failed");

        assert_eq!(orchestrator.cache.list("patients").unwrap().len(), 1);
        let failed = orchestrator.cache.metadata("samples").unwrap();
        assert_eq!(failed.status, CollectionStatus::Error);
        assert!(failed.last_sync_timestamp.is_none());
        assert!(failed.error.unwrap().contains("502"));
        assert_eq!(orchestrator.status().errors.len(), 1);
    }

    #[tokio::test]
    async fn test_pull_pages_until_short_page() {
        let remote = MemoryRemote::new();
        let t0 = Utc::now();
        for i in 0..7 {
            remote.insert(
                "orders",
                &format!("o{}", i),
                json!({"n": i}),
                t0 + chrono::Duration::milliseconds(i),
            );
        }
        let mut orchestrator = create_test_orchestrator(remote.clone(), &["orders"]);
        orchestrator.settings.page_size = 3;

        let report = orchestrator.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();
        assert_eq!(report.pulled, 7);
        // 3 + 3 + 1
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn test_page_cap_limits_one_pass() {
        let remote = MemoryRemote::new();
        let t0 = Utc::now();
        for i in 0..10 {
            remote.insert(
                "orders",
                &format!("o{}", i),
                json!({}),
                t0 + chrono::Duration::milliseconds(i),
            );
        }
        let mut orchestrator = create_test_orchestrator(remote.clone(), &["orders"]);
        orchestrator.settings.page_size = 2;
        orchestrator.settings.max_pages_per_pass = 2;

        orchestrator.run_pass(SyncTrigger::Manual).await;
        assert_eq!(orchestrator.cache.list("orders").unwrap().len(), 4);

        orchestrator.run_pass(SyncTrigger::Manual).await;
        assert_eq!(orchestrator.cache.list("orders").unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let orchestrator = create_test_orchestrator(MemoryRemote::new(), &[]);
        let mut events = orchestrator.subscribe();

        orchestrator.run_pass(SyncTrigger::Manual).await;

        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::PassCompleted(report) = event {
                assert_eq!(report.trigger, SyncTrigger::Manual);
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn test_undecodable_queue_entry_does_not_block_push() {
        let backend = Arc::new(MemoryBackend::new());
        let store = LocalStore::with_backend(backend.clone(), ValueCodec::plain());
        store.initialize().unwrap();
        let remote = MemoryRemote::new();
        let orchestrator = orchestrator_on(store, Arc::new(remote.clone()), &[]);

        orchestrator
            .queue
            .enqueue("patients", "p1", Operation::Create, json!({"name": "Jane"}))
            .unwrap();
        backend
            .put("queue/00000000000000000000000000", b"\x01\x00garbage")
            .unwrap();
        assert_eq!(orchestrator.status().pending_changes, 1);

        let report = orchestrator.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();
        assert_eq!(report.pushed, 1);
        assert!(!report.succeeded());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("queue entry queue/00000000000000000000000000"));
        assert!(remote.get("patients", "p1").is_some());
        assert_eq!(orchestrator.status().pending_changes, 0);
    }

    #[tokio::test]
    async fn test_sub_millisecond_remote_timestamps_settle() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let remote = MicrosecondRemote {
            docs: vec![
                RemoteDocument {
                    id: "p1".to_string(),
                    data: json!({"v": 1}),
                    updated_at: t0,
                },
                RemoteDocument {
                    id: "p2".to_string(),
                    data: json!({"v": 2}),
                    updated_at: t0 + chrono::Duration::microseconds(250),
                },
            ],
        };
        let store = LocalStore::new(PlatformCapabilities::in_memory());
        store.initialize().unwrap();
        let orchestrator = orchestrator_on(store, Arc::new(remote), &["patients"]);

        let first = orchestrator.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();
        assert_eq!(first.pulled, 2);

        // The same documents come back but are already cached
        let second = orchestrator.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();
        assert_eq!(second.pulled, 0);
        assert!(second.succeeded());
    }

    #[tokio::test]
    async fn test_pushed_write_reaches_cache_behind_watermark() {
        let remote = MemoryRemote::new();
        let orchestrator = create_test_orchestrator(remote.clone(), &["patients"]);

        remote.fail_document("patients", "p1", RemoteError::Network("502".into()));
        orchestrator
            .queue
            .enqueue("patients", "p1", Operation::Create, json!({"name": "Local"}))
            .unwrap();
        remote.insert(
            "patients",
            "p2",
            json!({"name": "Remote"}),
            Utc::now() + chrono::Duration::seconds(5),
        );

        // p1 fails while p2 moves the watermark past p1's timestamp
        let first = orchestrator.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();
        assert_eq!(first.push_failed, 1);
        assert_eq!(first.pulled, 1);

        remote.clear_document_failure("patients", "p1");
        let second = orchestrator.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();
        assert_eq!(second.pushed, 1);
        orchestrator.run_pass(SyncTrigger::Manual).await;

        let cached = orchestrator.cache.get_cached("patients", Some("p1")).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].data, json!({"name": "Local"}));
    }

    #[tokio::test]
    async fn test_last_pass_is_restored_by_a_new_orchestrator() {
        let store = LocalStore::new(PlatformCapabilities::in_memory());
        store.initialize().unwrap();
        let remote = MemoryRemote::new();
        remote.fail_queries("patients", RemoteError::Network("down".into()));

        let first = orchestrator_on(store.clone(), Arc::new(remote.clone()), &["patients"]);
        let report = first.run_pass(SyncTrigger::Manual).await.report().cloned().unwrap();

        let second = orchestrator_on(store, Arc::new(remote), &["patients"]);
        let status = second.status();
        assert_eq!(status.last_sync, Some(report.finished_at));
        assert_eq!(status.errors, report.errors);
        assert_eq!(status.errors.len(), 1);
    }
}
