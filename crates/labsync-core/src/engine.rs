//! `OfflineSync` - the application-facing entry point
//!
//! Application code calls [`OfflineSync::queue_operation`] for every local
//! mutation and [`OfflineSync::get_cached_data`] for reads. Sync passes run
//! in the background once [`OfflineSync::start`] is called, or on demand
//! through [`OfflineSync::sync_now`].
//!
//! # Example
//!
//! ```ignore
//! use labsync_core::{OfflineSync, PlatformCapabilities, SyncSettings, MemoryRemote, Operation};
//!
//! let sync = OfflineSync::new(
//!     PlatformCapabilities::embedded("~/.labsync/data"),
//!     Arc::new(MemoryRemote::new()),
//!     SyncSettings::default(),
//! )?;
//!
//! sync.queue_operation("samples", "s1", Operation::Update, json!({"status": "collected"}))?;
//! let _listener = sync.add_listener(|event| println!("{:?}", event));
//! sync.start()?;
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::config::{LabSyncConfig, SyncSettings};
use crate::error::SyncError;
use crate::network::NetworkMonitor;
use crate::queue::OperationQueue;
use crate::remote::RemoteStore;
use crate::resolver::{ConflictResolver, LastWriteWins};
use crate::storage::{LocalStore, PlatformCapabilities};
use crate::sync::{
    spawn_scheduler, ListenerHandle, StatusSnapshot, SyncEvent, SyncOrchestrator, SyncOutcome,
    SyncTrigger,
};
use crate::types::{CacheEntry, OfflineRecord, Operation, SyncMetadata};

struct SchedulerHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Offline-first sync engine
pub struct OfflineSync {
    store: LocalStore,
    queue: OperationQueue,
    cache: CacheManager,
    network: NetworkMonitor,
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl OfflineSync {
    /// Open the local store and wire the engine to `remote` with
    /// last-write-wins resolution and an initially online network monitor.
    pub fn new(
        capabilities: PlatformCapabilities,
        remote: Arc<dyn RemoteStore>,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        Self::with_parts(
            LocalStore::new(capabilities),
            remote,
            Arc::new(LastWriteWins),
            NetworkMonitor::default(),
            settings,
        )
    }

    /// Build from a loaded configuration file
    pub fn from_config(
        config: &LabSyncConfig,
        data_dir: &Path,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self, SyncError> {
        Self::new(config.to_capabilities(data_dir)?, remote, config.sync.clone())
    }

    /// Assemble from explicit components
    pub fn with_parts(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        resolver: Arc<dyn ConflictResolver>,
        network: NetworkMonitor,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        settings.validate()?;
        store.initialize()?;

        let queue = OperationQueue::new(store.clone());
        let cache = CacheManager::new(store.clone()).with_relation_fields(settings.relations.clone());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            cache.clone(),
            remote,
            resolver,
            network.clone(),
            settings,
        ));

        Ok(Self {
            store,
            queue,
            cache,
            network,
            orchestrator,
            scheduler: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Record a local mutation for later delivery
    pub fn queue_operation(
        &self,
        collection: &str,
        document_id: &str,
        operation: Operation,
        data: Value,
    ) -> Result<OfflineRecord, SyncError> {
        let record = self.queue.enqueue(collection, document_id, operation, data)?;
        self.orchestrator
            .emit(SyncEvent::StatusChanged(self.orchestrator.status()));
        Ok(record)
    }

    /// Cached remote data: one document when `id` is given, the whole
    /// collection otherwise
    pub fn get_cached_data(
        &self,
        collection: &str,
        id: Option<&str>,
    ) -> Result<Vec<CacheEntry>, SyncError> {
        self.cache.get_cached(collection, id)
    }

    /// Per-collection pull metadata
    pub fn metadata(&self) -> Result<Vec<SyncMetadata>, SyncError> {
        self.cache.all_metadata()
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.orchestrator.subscribe()
    }

    /// Call `callback` for every event until the handle is dropped or
    /// unsubscribed. Must be called within a tokio runtime.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(SyncEvent) + Send + Sync + 'static,
    {
        let mut receiver = self.orchestrator.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Sync listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        ListenerHandle::new(task)
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.orchestrator.status()
    }

    /// Run a pass now
    pub async fn sync_now(&self) -> SyncOutcome {
        self.orchestrator.run_pass(SyncTrigger::Manual).await
    }

    /// Start the background scheduler. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), SyncError> {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return Ok(());
        }
        if !self.store.is_initialized() {
            return Err(SyncError::StorageUnavailable(
                "cannot start after shutdown".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let task = spawn_scheduler(
            self.orchestrator.clone(),
            self.network.clone(),
            self.orchestrator.settings().interval(),
            cancel.clone(),
        );
        *slot = Some(SchedulerHandle { task, cancel });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Stop the scheduler after any in-flight pass and release the store
    pub async fn shutdown(&self) {
        let handle = self.scheduler.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(error = %e, "Sync scheduler ended abnormally");
            }
        }
        self.store.shutdown();
        info!("Offline sync shut down");
    }
}

impl Drop for OfflineSync {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.cancel.cancel();
        }
        self.store.shutdown();
    }
}
