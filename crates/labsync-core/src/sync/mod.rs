//! Synchronization layer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncOrchestrator                                               │
//! │  ├── OperationQueue  (push source)                              │
//! │  ├── CacheManager    (pull target + watermarks)                 │
//! │  ├── RemoteStore     (authoritative store, timeout-bounded)     │
//! │  ├── ConflictResolver (LWW on pull)                             │
//! │  └── event_tx: broadcast::Sender<SyncEvent>                     │
//! │                                                                 │
//! │  spawn_scheduler                                                │
//! │  ├── interval tick      -> run_pass(Timer)                      │
//! │  ├── went online        -> run_pass(Reconnect)                  │
//! │  └── CancellationToken  -> stop between passes                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod orchestrator;
pub mod scheduler;

pub use events::{
    ListenerHandle, StatusSnapshot, SyncEvent, SyncOutcome, SyncReport, SyncTrigger,
};
pub use orchestrator::{SyncOrchestrator, EVENT_CHANNEL_CAPACITY};
pub use scheduler::spawn_scheduler;
