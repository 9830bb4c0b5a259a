//! LabSync Core Library
//!
//! Offline synchronization for field lab workflows.
//!
//! ## Overview
//!
//! A client keeps working while disconnected: every local mutation is
//! queued durably, reads are served from a local replica of remote
//! collections, and a background orchestrator reconciles both directions
//! once the remote store is reachable.
//!
//! ## Guarantees
//!
//! - **At-least-once delivery**: a queued mutation stays queued until the
//!   remote acknowledges it
//! - **Per-document order**: edits to one document reach the remote in the
//!   order they were made, across retries and restarts
//! - **Failure isolation**: one document or collection failing never blocks
//!   the others
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`storage`] | tagged key/value store, encrypted and compressed at rest |
//! | [`queue`] | persistent log of pending mutations |
//! | [`cache`] | local replica plus per-collection watermarks |
//! | [`network`] | online/offline signal |
//! | [`sync`] | pass orchestration, scheduling, events |
//! | [`resolver`] | last-write-wins merge on pull |
//! | [`remote`] | remote store interface and implementations |
//!
//! ## Quick Start
//!
//! ```ignore
//! use labsync_core::{MemoryRemote, OfflineSync, Operation, PlatformCapabilities, SyncSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sync = OfflineSync::new(
//!         PlatformCapabilities::embedded("~/.labsync/data"),
//!         std::sync::Arc::new(MemoryRemote::new()),
//!         SyncSettings::default(),
//!     )?;
//!
//!     sync.queue_operation("samples", "s1", Operation::Create, serde_json::json!({"tube": "red"}))?;
//!     println!("{}", sync.sync_now().await.report().map(|r| r.to_string()).unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod network;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use cache::CacheManager;
pub use config::{LabSyncConfig, RemoteSettings, StorageSettings, SyncSettings, CONFIG_FILE_NAME};
pub use crypto::StoreCrypto;
pub use engine::OfflineSync;
pub use error::{SyncError, SyncResult};
pub use network::{ConnectivityChange, ConnectivityProbe, NetworkMonitor};
pub use queue::{OperationQueue, QueueScan, QueueStats};
#[cfg(feature = "http")]
pub use remote::HttpRemote;
pub use remote::{MemoryRemote, RemoteError, RemoteStore, RemoteWrite};
pub use resolver::{ConflictResolver, LastWriteWins, Resolution};
pub use storage::{BackendKind, LocalStore, PlatformCapabilities, StorageBackend};
pub use sync::{
    ListenerHandle, StatusSnapshot, SyncEvent, SyncOrchestrator, SyncOutcome, SyncReport,
    SyncTrigger,
};
pub use types::*;
