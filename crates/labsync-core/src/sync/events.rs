//! Sync pass outcomes, status snapshots and listener plumbing
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncTrigger: why a pass started (Timer, Reconnect, Manual)     │
//! │  SyncOutcome: Completed(SyncReport) | AlreadyRunning | Offline  │
//! │                                                                 │
//! │  SyncEvent: broadcast to every listener                         │
//! │  ├── StatusChanged: new StatusSnapshot                          │
//! │  ├── PassCompleted: SyncReport of a finished pass               │
//! │  └── ConnectivityChanged: went online / offline                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::network::ConnectivityChange;

/// What started a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Timer,
    Reconnect,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Timer => write!(f, "timer"),
            SyncTrigger::Reconnect => write!(f, "reconnect"),
            SyncTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Summary of one completed pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records delivered to the remote
    pub pushed: usize,
    /// Records whose push failed this pass
    pub push_failed: usize,
    /// Records left untouched: sticky rejections and later edits of a
    /// document whose earlier record did not go through
    pub held: usize,
    /// Remote documents written into the cache
    pub pulled: usize,
    /// Collections whose pull failed
    pub collections_failed: usize,
    /// Human-readable failures, in the order they happened
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn new(trigger: SyncTrigger) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            started_at: now,
            finished_at: now,
            pushed: 0,
            push_failed: 0,
            held: 0,
            pulled: 0,
            collections_failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.push_failed == 0 && self.collections_failed == 0 && self.errors.is_empty()
    }

    /// Notification label for the pass
    pub fn notification(&self) -> &'static str {
        if self.succeeded() {
            "succeeded"
        } else {
            "failed"
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync {} ({}): pushed {}, failed {}, held {}, pulled {}",
            self.notification(),
            self.trigger,
            self.pushed,
            self.push_failed,
            self.held,
            self.pulled
        )?;
        if self.collections_failed > 0 {
            write!(f, ", {} collection(s) failed", self.collections_failed)?;
        }
        Ok(())
    }
}

/// Result of asking for a pass
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass was in flight; nothing was done
    AlreadyRunning,
    /// The network monitor reports offline; nothing was done
    Offline,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Point-in-time view of the engine for UIs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub is_syncing: bool,
    /// End of the last completed pass
    pub last_sync: Option<DateTime<Utc>>,
    /// Queued records not yet delivered
    pub pending_changes: usize,
    /// Failures from the last pass plus collection pull errors
    pub errors: Vec<String>,
}

/// Events broadcast to listeners
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StatusChanged(StatusSnapshot),
    PassCompleted(SyncReport),
    ConnectivityChanged(ConnectivityChange),
}

/// Keeps a listener task alive. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop delivering events to this listener
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_notification() {
        let mut report = SyncReport::new(SyncTrigger::Manual);
        report.pushed = 3;
        assert!(report.succeeded());
        assert_eq!(report.notification(), "succeeded");

        report.push_failed = 1;
        assert_eq!(report.notification(), "failed");
        assert_eq!(
            report.to_string(),
            "sync failed (manual): pushed 3, failed 1, held 0, pulled 0"
        );
    }

    #[test]
    fn test_outcome_report_accessor() {
        let report = SyncReport::new(SyncTrigger::Timer);
        assert!(SyncOutcome::Completed(report).report().is_some());
        assert!(SyncOutcome::AlreadyRunning.report().is_none());
    }

    #[test]
    fn test_snapshot_default_is_idle() {
        let snapshot = StatusSnapshot::default();
        assert!(!snapshot.is_syncing);
        assert!(snapshot.last_sync.is_none());
        assert_eq!(snapshot.pending_changes, 0);
    }

    #[tokio::test]
    async fn test_listener_handle_aborts_task_on_drop() {
        let handle = ListenerHandle::new(tokio::spawn(std::future::pending::<()>()));
        assert!(handle.is_active());
        handle.unsubscribe();
    }
}
