//! Connectivity monitoring.
//!
//! The monitor owns one bit of state, the last known reachability, and
//! emits a [`ConnectivityChange`] only when that bit flips. The platform's
//! reachability signal is fed in through [`NetworkMonitor::set_online`],
//! or polled from a [`ConnectivityProbe`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sync::ListenerHandle;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A reachability transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityChange {
    WentOnline,
    WentOffline,
}

impl ConnectivityChange {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityChange::WentOnline)
    }
}

impl fmt::Display for ConnectivityChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityChange::WentOnline => write!(f, "online"),
            ConnectivityChange::WentOffline => write!(f, "offline"),
        }
    }
}

/// Source of reachability readings
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Tracks online/offline state and fans out transitions.
///
/// Cloning shares the state.
#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
    changes: broadcast::Sender<ConnectivityChange>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(state),
            changes,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Report the current reachability. Returns whether this was a
    /// transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            let change = if online {
                ConnectivityChange::WentOnline
            } else {
                ConnectivityChange::WentOffline
            };
            info!(%change, "Connectivity changed");
            // No receivers is fine
            let _ = self.changes.send(change);
        }
        changed
    }

    /// Receive every future transition
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.changes.subscribe()
    }

    /// Watch the current value; useful for waiting until online
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Run `callback` on every transition until the handle is dropped.
    /// Must be called within a tokio runtime.
    pub fn on_change<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(ConnectivityChange) + Send + Sync + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => callback(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Connectivity listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        ListenerHandle::new(task)
    }

    /// Poll `probe` every `interval` and feed the readings in until
    /// `cancel` fires.
    pub fn spawn_probe(
        &self,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let online = probe.check().await;
                        monitor.set_online(online);
                    }
                }
            }
            debug!("Connectivity probe stopped");
        })
    }
}
